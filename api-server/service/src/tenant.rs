use chat_api_server_core::{Cluster, Error, Identity, Result, TenantSize};
use tracing::{debug, info};

/// Onboards tenants with one caller's client.
///
/// A tenant gets a namespace named after it, a resource quota sized by its
/// [`TenantSize`], and a certificate issuer. Registering again leaves what
/// already exists in place.
#[derive(Debug)]
pub struct TenantController<C> {
    client: C,
}

// === impl TenantController ===

impl<C: Cluster> TenantController<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    /// Validates the request before any cluster call, then creates the
    /// namespace, its quota and the issuer in that order. The first failure
    /// stops the sequence.
    pub async fn register(
        &self,
        caller: &Identity,
        username: &str,
        size: Option<TenantSize>,
    ) -> Result<()> {
        let size = size.ok_or_else(|| Error::validation("size must be set"))?;
        if username.is_empty() {
            return Err(Error::validation("username must be set"));
        }
        if caller.email.is_empty() {
            return Err(Error::validation("caller has no email"));
        }

        let namespace = username;
        self.client.create_namespace(namespace).await?;

        let quota = size.quota();
        debug!(?size, cpu = %quota.cpu(), memory = %quota.memory(), "Limiting namespace");
        self.client.create_quota(namespace, &quota).await?;

        let issuer = self
            .client
            .create_issuer(namespace, username, &caller.email)
            .await?;
        info!(%namespace, %issuer, "Registered tenant");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use chat_api_server_core::Quota;
    use pretty_assertions::assert_eq;

    fn caller() -> Identity {
        Identity {
            subject: "1234".to_string(),
            email: "jane@example.com".to_string(),
            name: "jane".to_string(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn registers_namespace_quota_and_issuer() {
        let cluster = FakeCluster::default();
        TenantController::new(cluster.clone())
            .register(&caller(), "jane", Some(TenantSize::Medium))
            .await
            .expect("register must succeed");

        assert_eq!(
            cluster.calls(),
            vec![
                "create_namespace jane",
                "create_quota jane 2000m 4Gi",
                "create_issuer jane/jane jane@example.com",
            ]
        );
        assert!(cluster.has_namespace("jane"));
        assert_eq!(
            cluster.quota("jane"),
            Some(Quota {
                cpu_millis: 2000,
                memory_gib: 4,
            })
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn invalid_requests_make_no_cluster_calls() {
        let cluster = FakeCluster::default();
        let controller = TenantController::new(cluster.clone());

        let res = controller.register(&caller(), "jane", None).await;
        assert!(matches!(res, Err(Error::Validation(_))), "{res:?}");

        let res = controller
            .register(&caller(), "", Some(TenantSize::Small))
            .await;
        assert!(matches!(res, Err(Error::Validation(_))), "{res:?}");

        let res = controller
            .register(&Identity::default(), "jane", Some(TenantSize::Small))
            .await;
        assert!(matches!(res, Err(Error::Validation(_))), "{res:?}");

        assert!(cluster.calls().is_empty(), "{:?}", cluster.calls());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn quota_failure_stops_registration() {
        let cluster = FakeCluster::default();
        cluster.fail("create_quota", 403);
        let res = TenantController::new(cluster.clone())
            .register(&caller(), "jane", Some(TenantSize::Large))
            .await;
        assert!(matches!(res, Err(Error::Upstream { code: Some(403), .. })));
        assert_eq!(
            cluster.calls(),
            vec!["create_namespace jane", "create_quota jane 4000m 8Gi"]
        );
        assert!(cluster.has_namespace("jane"));
    }
}
