#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Verifies OIDC bearer tokens.
//!
//! A [`Verifier`] is built once at startup, either by discovering the
//! identity provider's signing keys or from a fixed key set, and is shared by
//! every request.

use chat_api_server_core::{AuthError, Authenticate, BearerToken, Identity};
use jsonwebtoken::{
    decode, decode_header,
    errors::{Error as JwtError, ErrorKind},
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm},
    Algorithm, DecodingKey, Validation,
};
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::Duration;
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, info, warn};

#[cfg(test)]
mod tests;

/// Tolerated clock skew, in seconds.
pub const LEEWAY_SECS: u64 = 60;

/// Minimum time between two key set fetches triggered by unknown keys.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct OidcConfig {
    pub issuer_url: String,
    pub client_id: String,

    /// Skips TLS verification toward the identity provider. Development only.
    pub insecure_skip_verify: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("failed to reach identity provider: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("identity provider reports issuer {actual}, expected {expected}")]
    IssuerMismatch { expected: String, actual: String },
}

/// Checks a token's signature, issuer, audience and expiry.
#[derive(Debug)]
pub struct Verifier {
    issuer: String,
    audience: String,
    keys: RwLock<JwkSet>,
    remote: Option<Remote>,
}

/// Where a discovered key set is refreshed from.
#[derive(Debug)]
struct Remote {
    http: reqwest::Client,
    jwks_uri: String,
    last_fetch: Mutex<Instant>,
}

#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    issuer: String,
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

// === impl Verifier ===

impl Verifier {
    /// Reads the provider's metadata and fetches its signing keys.
    pub async fn discover(config: OidcConfig) -> Result<Self, DiscoveryError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(config.insecure_skip_verify)
            .build()?;
        if config.insecure_skip_verify {
            warn!("TLS verification toward the identity provider is disabled");
        }

        let url = format!(
            "{}/.well-known/openid-configuration",
            config.issuer_url.trim_end_matches('/')
        );
        let metadata = get_json::<ProviderMetadata>(&http, &url).await?;
        if metadata.issuer != config.issuer_url {
            return Err(DiscoveryError::IssuerMismatch {
                expected: config.issuer_url,
                actual: metadata.issuer,
            });
        }

        let keys = get_json::<JwkSet>(&http, &metadata.jwks_uri).await?;
        info!(
            issuer = %metadata.issuer,
            jwks_uri = %metadata.jwks_uri,
            keys = keys.keys.len(),
            "Discovered identity provider"
        );

        Ok(Self {
            issuer: metadata.issuer,
            audience: config.client_id,
            keys: RwLock::new(keys),
            remote: Some(Remote {
                http,
                jwks_uri: metadata.jwks_uri,
                last_fetch: Mutex::new(Instant::now()),
            }),
        })
    }

    /// Builds a verifier over a fixed key set that is never refreshed.
    pub fn from_jwks(issuer: impl Into<String>, audience: impl Into<String>, keys: JwkSet) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            keys: RwLock::new(keys),
            remote: None,
        }
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(auth_error)?;
        let (key, algorithms) = self.key(header.kid.as_deref()).await?;

        // The header only selects among the algorithms the key allows.
        let mut validation = Validation::new(header.alg);
        validation.algorithms = algorithms;
        validation.leeway = LEEWAY_SECS;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let claims = decode::<Claims>(token, &key, &validation)
            .map_err(auth_error)?
            .claims;
        Ok(Identity {
            subject: claims.sub,
            email: claims.email,
            name: claims.preferred_username.or(claims.name).unwrap_or_default(),
        })
    }

    async fn key(&self, kid: Option<&str>) -> Result<(DecodingKey, Vec<Algorithm>), AuthError> {
        if let Some(key) = self.cached_key(kid)? {
            return Ok(key);
        }
        if let Some(remote) = &self.remote {
            self.refresh(remote).await;
        }
        self.cached_key(kid)?.ok_or(AuthError::UnknownKey)
    }

    fn cached_key(
        &self,
        kid: Option<&str>,
    ) -> Result<Option<(DecodingKey, Vec<Algorithm>)>, AuthError> {
        let keys = self.keys.read();
        let jwk = match kid {
            Some(kid) => keys.find(kid),
            // Without a key id only an unambiguous key set will do.
            None if keys.keys.len() == 1 => keys.keys.first(),
            None => None,
        };
        let Some(jwk) = jwk else {
            return Ok(None);
        };
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|error| AuthError::Invalid(format!("unusable signing key: {error}")))?;
        let algorithms = key_algorithms(jwk);
        if algorithms.is_empty() {
            return Err(AuthError::Invalid(
                "signing key does not allow a signature algorithm".to_string(),
            ));
        }
        Ok(Some((key, algorithms)))
    }

    async fn refresh(&self, remote: &Remote) {
        let mut last_fetch = remote.last_fetch.lock().await;
        if last_fetch.elapsed() < MIN_REFRESH_INTERVAL {
            debug!("Key set refreshed recently; not fetching");
            return;
        }
        *last_fetch = Instant::now();

        match get_json::<JwkSet>(&remote.http, &remote.jwks_uri).await {
            Ok(keys) => {
                debug!(keys = keys.keys.len(), "Refreshed key set");
                *self.keys.write() = keys;
            }
            Err(error) => warn!(%error, "Failed to refresh key set"),
        }
    }
}

#[async_trait::async_trait]
impl Authenticate for Verifier {
    async fn authenticate(&self, token: &BearerToken) -> Result<Identity, AuthError> {
        self.verify(token.expose()).await
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<T, DiscoveryError> {
    let rsp = http.get(url).send().await?;
    if !rsp.status().is_success() {
        return Err(DiscoveryError::Status {
            url: url.to_string(),
            status: rsp.status(),
        });
    }
    Ok(rsp.json().await?)
}

/// The algorithms a key may verify: the one it names, or else those of its
/// key type.
fn key_algorithms(jwk: &Jwk) -> Vec<Algorithm> {
    if let Some(alg) = &jwk.common.key_algorithm {
        return signing_algorithm(alg).into_iter().collect();
    }
    match &jwk.algorithm {
        AlgorithmParameters::RSA(_) => vec![
            Algorithm::RS256,
            Algorithm::RS384,
            Algorithm::RS512,
            Algorithm::PS256,
            Algorithm::PS384,
            Algorithm::PS512,
        ],
        AlgorithmParameters::EllipticCurve(params) => match params.curve {
            EllipticCurve::P256 => vec![Algorithm::ES256],
            EllipticCurve::P384 => vec![Algorithm::ES384],
            _ => vec![],
        },
        AlgorithmParameters::OctetKey(_) => {
            vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512]
        }
        AlgorithmParameters::OctetKeyPair(_) => vec![Algorithm::EdDSA],
    }
}

fn signing_algorithm(alg: &KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        // Encryption algorithms never verify a signature.
        _ => None,
    }
}

fn auth_error(error: JwtError) -> AuthError {
    match error.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            AuthError::Malformed
        }
        _ => AuthError::Invalid(error.to_string()),
    }
}
