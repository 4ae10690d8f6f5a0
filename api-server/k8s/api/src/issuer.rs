use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// A namespaced cert-manager certificate issuer.
///
/// Only the issuer kinds this server provisions are modeled.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<SelfSignedIssuer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acme: Option<AcmeIssuer>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelfSignedIssuer {}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcmeIssuer {
    pub server: String,
    pub email: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub preferred_chain: String,

    pub private_key_secret_ref: SecretKeySelector,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecretKeySelector {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn self_signed_is_an_empty_object() {
        let spec = IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            acme: None,
        };
        assert_eq!(
            serde_json::to_value(&spec).expect("must serialize"),
            json!({ "selfSigned": {} })
        );
    }

    #[test]
    fn acme_uses_cert_manager_field_names() {
        let spec = IssuerSpec {
            self_signed: None,
            acme: Some(AcmeIssuer {
                server: "https://acme.example.com/directory".to_string(),
                email: "jane@example.com".to_string(),
                preferred_chain: "ISRG Root X1".to_string(),
                private_key_secret_ref: SecretKeySelector {
                    name: "jane-issuer-private-key".to_string(),
                    key: None,
                },
            }),
        };
        assert_eq!(
            serde_json::to_value(&spec).expect("must serialize"),
            json!({
                "acme": {
                    "server": "https://acme.example.com/directory",
                    "email": "jane@example.com",
                    "preferredChain": "ISRG Root X1",
                    "privateKeySecretRef": { "name": "jane-issuer-private-key" }
                }
            })
        );
    }
}
