use crate::upstream;
use chat_api_server_core::{Result, FIELD_MANAGER};
use chat_api_server_k8s_api::{
    self as k8s, AcmeIssuer, IssuerSpec, ObjectMeta, SecretKeySelector, SelfSignedIssuer,
};
use kube::api::{Api, PostParams};
use tracing::{debug, info};

pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";

const PREFERRED_CHAIN: &str = "ISRG Root X1";

/// The kind of certificate issuer provisioned for each admin user.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum IssuerKind {
    #[default]
    SelfSigned,
    Acme {
        server: String,
    },
}

pub(crate) fn issuer_name(user: &str) -> String {
    format!("{user}-issuer")
}

pub(crate) fn private_key_name(user: &str) -> String {
    format!("{user}-issuer-private-key")
}

pub(crate) fn issuer_spec(kind: &IssuerKind, user: &str, email: &str) -> IssuerSpec {
    match kind {
        IssuerKind::SelfSigned => IssuerSpec {
            self_signed: Some(SelfSignedIssuer {}),
            acme: None,
        },
        IssuerKind::Acme { server } => IssuerSpec {
            self_signed: None,
            acme: Some(AcmeIssuer {
                server: server.clone(),
                email: email.to_string(),
                preferred_chain: PREFERRED_CHAIN.to_string(),
                private_key_secret_ref: SecretKeySelector {
                    name: private_key_name(user),
                    key: None,
                },
            }),
        },
    }
}

/// Creates the issuer for `user`, reusing one that already exists.
pub(crate) async fn create(
    client: kube::Client,
    kind: &IssuerKind,
    namespace: &str,
    user: &str,
    email: &str,
) -> Result<String> {
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };

    if let IssuerKind::Acme { .. } = kind {
        let secret = k8s::Secret {
            metadata: ObjectMeta {
                name: Some(private_key_name(user)),
                ..Default::default()
            },
            ..Default::default()
        };
        let api = Api::<k8s::Secret>::namespaced(client.clone(), namespace);
        match api.create(&params, &secret).await {
            Ok(_) => debug!(%namespace, %user, "Created issuer private key secret"),
            Err(kube::Error::Api(rsp)) if rsp.code == 409 => {
                debug!(%namespace, %user, "Issuer private key secret already exists")
            }
            Err(error) => return Err(upstream("failed to create issuer private key")(error)),
        }
    }

    let name = issuer_name(user);
    let issuer = k8s::Issuer::new(&name, issuer_spec(kind, user, email));
    let api = Api::<k8s::Issuer>::namespaced(client, namespace);
    match api.create(&params, &issuer).await {
        Ok(_) => info!(%namespace, issuer = %name, "Created issuer"),
        Err(kube::Error::Api(rsp)) if rsp.code == 409 => {
            debug!(%namespace, issuer = %name, "Issuer already exists")
        }
        Err(error) => return Err(upstream("failed to create issuer")(error)),
    }
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn self_signed_by_default() {
        let spec = issuer_spec(&IssuerKind::default(), "jane", "jane@example.com");
        assert_eq!(spec.self_signed, Some(SelfSignedIssuer {}));
        assert_eq!(spec.acme, None);
        assert_eq!(issuer_name("jane"), "jane-issuer");
    }

    #[test]
    fn acme_references_private_key() {
        let kind = IssuerKind::Acme {
            server: LETS_ENCRYPT_DIRECTORY.to_string(),
        };
        let spec = issuer_spec(&kind, "jane", "jane@example.com");
        assert_eq!(spec.self_signed, None);
        assert_eq!(
            spec.acme,
            Some(AcmeIssuer {
                server: LETS_ENCRYPT_DIRECTORY.to_string(),
                email: "jane@example.com".to_string(),
                preferred_chain: "ISRG Root X1".to_string(),
                private_key_secret_ref: SecretKeySelector {
                    name: "jane-issuer-private-key".to_string(),
                    key: None,
                },
            })
        );
    }
}
