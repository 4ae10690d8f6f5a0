#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Cluster access on behalf of a caller.
//!
//! Every client built here authenticates with the caller's own bearer token,
//! so the API server enforces the caller's RBAC grants rather than this
//! server's.

mod cluster;
mod convert;
mod issuer;
mod logs;
mod tenant;
mod watch;

pub use self::{
    cluster::KubeCluster,
    issuer::{IssuerKind, LETS_ENCRYPT_DIRECTORY},
    logs::PodLogs,
};
use chat_api_server_core::{BearerToken, Error, Result, ScopedClients};
use kube::config::AuthInfo;
use secrecy::SecretString;

/// Builds a [`KubeCluster`] per call from the server's base configuration.
#[derive(Clone)]
pub struct ClientFactory {
    base: kube::Config,
    issuers: IssuerKind,
}

// === impl ClientFactory ===

impl ClientFactory {
    pub fn new(base: kube::Config, issuers: IssuerKind) -> Self {
        Self { base, issuers }
    }

    /// The base configuration with every server credential replaced by
    /// `token`.
    ///
    /// The cluster address, CA bundle and TLS server name are kept.
    pub fn scoped_config(&self, token: &BearerToken) -> kube::Config {
        let mut config = self.base.clone();
        config.auth_info = AuthInfo {
            token: Some(SecretString::from(token.expose().to_string())),
            ..AuthInfo::default()
        };
        config
    }
}

impl ScopedClients for ClientFactory {
    type Client = KubeCluster;

    fn scoped(&self, token: &BearerToken) -> Result<KubeCluster> {
        let client = kube::Client::try_from(self.scoped_config(token))
            .map_err(|error| Error::ClientConstruction(error.into()))?;
        Ok(KubeCluster::new(client, self.issuers.clone()))
    }
}

impl std::fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientFactory")
            .field("cluster_url", &self.base.cluster_url)
            .field("issuers", &self.issuers)
            .finish_non_exhaustive()
    }
}

/// Attaches the API server's status code, if any, to a failed call.
pub(crate) fn upstream(context: &'static str) -> impl FnOnce(kube::Error) -> Error {
    move |error| {
        let code = match &error {
            kube::Error::Api(rsp) => Some(rsp.code),
            _ => None,
        };
        Error::upstream(context, code, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base() -> kube::Config {
        let mut config = kube::Config::new(
            "https://10.0.0.1:6443"
                .parse()
                .expect("cluster url must parse"),
        );
        config.tls_server_name = Some("kubernetes.default.svc".to_string());
        config.auth_info = AuthInfo {
            token: Some(SecretString::from("service-account-token".to_string())),
            client_certificate_data: Some("Y2VydA==".to_string()),
            client_key_data: Some(SecretString::from("a2V5".to_string())),
            username: Some("admin".to_string()),
            password: Some(SecretString::from("hunter2".to_string())),
            impersonate: Some("system:admin".to_string()),
            ..AuthInfo::default()
        };
        config
    }

    #[test]
    fn scoped_config_carries_only_caller_token() {
        let factory = ClientFactory::new(base(), IssuerKind::SelfSigned);
        let token = BearerToken::new("caller-token").expect("token");
        let config = factory.scoped_config(&token);

        assert_eq!(config.cluster_url, base().cluster_url);
        assert_eq!(config.tls_server_name.as_deref(), Some("kubernetes.default.svc"));
        assert_eq!(
            config.auth_info.token.as_ref().map(|t| t.expose_secret()),
            Some("caller-token")
        );
        assert!(config.auth_info.client_certificate_data.is_none());
        assert!(config.auth_info.client_key_data.is_none());
        assert!(config.auth_info.username.is_none());
        assert!(config.auth_info.password.is_none());
        assert!(config.auth_info.impersonate.is_none());
        assert!(config.auth_info.exec.is_none());
    }

    #[test]
    fn maps_api_status_codes() {
        let error = kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "rockets.chat.accso.de is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });
        match upstream("failed to get rocket")(error) {
            Error::Upstream { code, context, .. } => {
                assert_eq!(code, Some(403));
                assert_eq!(context, "failed to get rocket");
            }
            error => panic!("unexpected error: {error}"),
        }
    }
}
