use crate::{convert, issuer, tenant, upstream, watch, IssuerKind, PodLogs};
use chat_api_server_core::{Cluster, Error, Quota, Result, Rocket, WatchStream, FIELD_MANAGER};
use chat_api_server_k8s_api::{self as k8s, PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use tracing::debug;

/// Cluster access through a client that carries one caller's credential.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
    issuers: IssuerKind,
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: kube::Client, issuers: IssuerKind) -> Self {
        Self { client, issuers }
    }

    fn rockets(&self, namespace: &str) -> Api<k8s::Rocket> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

#[async_trait::async_trait]
impl Cluster for KubeCluster {
    type Logs = PodLogs;

    async fn get_rocket(&self, namespace: &str, name: &str) -> Result<Option<Rocket>> {
        let rocket = Api::<k8s::Rocket>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(upstream("failed to get rocket"))?;
        Ok(rocket.map(convert::rocket))
    }

    async fn list_rockets(&self, namespace: &str) -> Result<Vec<Rocket>> {
        let list = self
            .rockets(namespace)
            .list(&ListParams::default())
            .await
            .map_err(upstream("failed to list rockets"))?;
        Ok(list.items.into_iter().map(convert::rocket).collect())
    }

    async fn create_rocket(&self, rocket: &Rocket) -> Result<()> {
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Api::<k8s::Rocket>::namespaced(self.client.clone(), &rocket.namespace)
            .create(&params, &convert::resource(rocket))
            .await
            .map_err(upstream("failed to create rocket"))?;
        Ok(())
    }

    async fn delete_rocket(&self, namespace: &str, name: &str) -> Result<()> {
        match Api::<k8s::Rocket>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(rsp)) if rsp.code == 404 => {
                Err(Error::not_found("rocket", namespace, name))
            }
            Err(error) => Err(upstream("failed to delete rocket")(error)),
        }
    }

    async fn watch_rocket(&self, namespace: &str, name: &str) -> Result<WatchStream> {
        watch::rocket(self.client.clone(), namespace, name).await
    }

    async fn pod_claims(&self, namespace: &str, pod: &str) -> Result<Vec<String>> {
        let pod = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .get(pod)
            .await
            .map_err(upstream("failed to get pod"))?;
        Ok(convert::claims(&pod))
    }

    async fn delete_claim(&self, namespace: &str, claim: &str) -> Result<()> {
        debug!(%namespace, %claim, "Deleting persistent volume claim");
        Api::<PersistentVolumeClaim>::namespaced(self.client.clone(), namespace)
            .delete(claim, &DeleteParams::default())
            .await
            .map_err(upstream("failed to delete volume claim"))?;
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        tenant::create_namespace(self.client.clone(), name).await
    }

    async fn create_quota(&self, namespace: &str, quota: &Quota) -> Result<()> {
        tenant::create_quota(self.client.clone(), namespace, quota).await
    }

    async fn create_issuer(&self, namespace: &str, user: &str, email: &str) -> Result<String> {
        issuer::create(self.client.clone(), &self.issuers, namespace, user, email).await
    }

    fn pod_logs(&self, namespace: &str, pod: &str) -> PodLogs {
        PodLogs::new(Api::namespaced(self.client.clone(), namespace), pod)
    }
}

impl std::fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeCluster")
            .field("issuers", &self.issuers)
            .finish_non_exhaustive()
    }
}
