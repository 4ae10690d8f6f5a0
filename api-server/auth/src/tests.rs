use super::*;
use jsonwebtoken::{encode, get_current_timestamp, Algorithm, EncodingKey, Header};
use serde_json::json;

const ISSUER: &str = "https://idp.example.com/auth/realms/kubernetes";
const AUDIENCE: &str = "kubernetes";

// Encodes without padding or URL-unsafe characters.
const SECRET: &[u8] = b"abcdefghijklmnopqrstuvwx";
const SECRET_B64: &str = "YWJjZGVmZ2hpamtsbW5vcHFyc3R1dnd4";

fn verifier() -> Verifier {
    let keys = serde_json::from_value(json!({
        "keys": [{
            "kty": "oct",
            "kid": "test-key",
            "alg": "HS256",
            "k": SECRET_B64,
        }]
    }))
    .expect("key set must parse");
    Verifier::from_jwks(ISSUER, AUDIENCE, keys)
}

fn sign(kid: &str, secret: &[u8], claims: serde_json::Value) -> String {
    sign_with(Algorithm::HS256, kid, secret, claims)
}

fn sign_with(alg: Algorithm, kid: &str, secret: &[u8], claims: serde_json::Value) -> String {
    let header = Header {
        kid: Some(kid.to_string()),
        ..Header::new(alg)
    };
    encode(&header, &claims, &EncodingKey::from_secret(secret)).expect("token must encode")
}

fn claims() -> serde_json::Value {
    json!({
        "iss": ISSUER,
        "aud": AUDIENCE,
        "sub": "f81d4fae",
        "email": "jane@example.com",
        "preferred_username": "jane",
        "exp": get_current_timestamp() + 300,
    })
}

fn with(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut claims = claims();
    claims[key] = value;
    claims
}

#[tokio::test(flavor = "current_thread")]
async fn accepts_valid_token() {
    let token = sign("test-key", SECRET, claims());
    let identity = verifier().verify(&token).await.expect("token must verify");
    assert_eq!(
        identity,
        Identity {
            subject: "f81d4fae".to_string(),
            email: "jane@example.com".to_string(),
            name: "jane".to_string(),
        }
    );
}

#[tokio::test(flavor = "current_thread")]
async fn authenticates_bearer_tokens() {
    let token = BearerToken::new(sign("test-key", SECRET, claims())).expect("token");
    let identity = verifier()
        .authenticate(&token)
        .await
        .expect("token must verify");
    assert_eq!(identity.email, "jane@example.com");
}

#[tokio::test(flavor = "current_thread")]
async fn falls_back_to_name_claim() {
    let mut claims = claims();
    claims
        .as_object_mut()
        .expect("object")
        .remove("preferred_username");
    claims["name"] = json!("Jane Doe");
    let token = sign("test-key", SECRET, claims);
    let identity = verifier().verify(&token).await.expect("token must verify");
    assert_eq!(identity.name, "Jane Doe");
}

#[tokio::test(flavor = "current_thread")]
async fn tolerates_small_clock_skew() {
    let exp = get_current_timestamp() - LEEWAY_SECS / 2;
    let token = sign("test-key", SECRET, with("exp", json!(exp)));
    assert!(verifier().verify(&token).await.is_ok());
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_expired_token() {
    let exp = get_current_timestamp() - 3600;
    let token = sign("test-key", SECRET, with("exp", json!(exp)));
    assert_eq!(verifier().verify(&token).await, Err(AuthError::Expired));
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_wrong_audience() {
    let token = sign("test-key", SECRET, with("aud", json!("other-client")));
    assert_eq!(
        verifier().verify(&token).await,
        Err(AuthError::InvalidAudience)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_wrong_issuer() {
    let token = sign("test-key", SECRET, with("iss", json!("https://evil.example.com")));
    assert_eq!(verifier().verify(&token).await, Err(AuthError::InvalidIssuer));
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_bad_signature() {
    let token = sign("test-key", b"not-the-right-secret-at-all", claims());
    assert!(matches!(
        verifier().verify(&token).await,
        Err(AuthError::Invalid(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_unknown_key() {
    let token = sign("rotated-key", SECRET, claims());
    assert_eq!(verifier().verify(&token).await, Err(AuthError::UnknownKey));
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_garbage() {
    assert_eq!(
        verifier().verify("not-a-jwt").await,
        Err(AuthError::Malformed)
    );
}

#[tokio::test(flavor = "current_thread")]
async fn rejects_algorithm_the_key_does_not_name() {
    let token = sign_with(Algorithm::HS384, "test-key", SECRET, claims());
    assert!(matches!(
        verifier().verify(&token).await,
        Err(AuthError::Invalid(_))
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn keys_without_algorithm_allow_their_family() {
    let keys = serde_json::from_value(json!({
        "keys": [{ "kty": "oct", "kid": "test-key", "k": SECRET_B64 }]
    }))
    .expect("key set must parse");
    let verifier = Verifier::from_jwks(ISSUER, AUDIENCE, keys);

    let token = sign_with(Algorithm::HS384, "test-key", SECRET, claims());
    let identity = verifier.verify(&token).await.expect("token must verify");
    assert_eq!(identity.subject, "f81d4fae");
}
