use crate::upstream;
use chat_api_server_core::{Quota, Result, FIELD_MANAGER};
use chat_api_server_k8s_api::{Namespace, ObjectMeta, Quantity, ResourceQuota, ResourceQuotaSpec};
use kube::api::{Api, PostParams};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Name of the quota placed in every tenant namespace.
pub(crate) const QUOTA_NAME: &str = "tenant-quota";

pub(crate) fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub(crate) fn resource_quota(quota: &Quota) -> ResourceQuota {
    let hard = BTreeMap::from([
        ("limits.cpu".to_string(), Quantity(quota.cpu())),
        ("limits.memory".to_string(), Quantity(quota.memory())),
    ]);
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(QUOTA_NAME.to_string()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(hard),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) async fn create_namespace(client: kube::Client, name: &str) -> Result<()> {
    match Api::<Namespace>::all(client)
        .create(&params(), &namespace(name))
        .await
    {
        Ok(_) => info!(namespace = %name, "Created namespace"),
        Err(kube::Error::Api(rsp)) if rsp.code == 409 => {
            debug!(namespace = %name, "Namespace already exists")
        }
        Err(error) => return Err(upstream("failed to create namespace")(error)),
    }
    Ok(())
}

pub(crate) async fn create_quota(
    client: kube::Client,
    namespace: &str,
    quota: &Quota,
) -> Result<()> {
    match Api::<ResourceQuota>::namespaced(client, namespace)
        .create(&params(), &resource_quota(quota))
        .await
    {
        Ok(_) => info!(
            %namespace,
            cpu = %quota.cpu(),
            memory = %quota.memory(),
            "Created resource quota"
        ),
        Err(kube::Error::Api(rsp)) if rsp.code == 409 => {
            debug!(%namespace, "Resource quota already exists")
        }
        Err(error) => return Err(upstream("failed to create resource quota")(error)),
    }
    Ok(())
}

fn params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_api_server_core::TenantSize;
    use pretty_assertions::assert_eq;

    #[test]
    fn namespace_is_named_after_tenant() {
        assert_eq!(namespace("jane").metadata.name.as_deref(), Some("jane"));
    }

    #[test]
    fn quota_limits_cpu_and_memory() {
        let rq = resource_quota(&TenantSize::Small.quota());
        assert_eq!(rq.metadata.name.as_deref(), Some(QUOTA_NAME));
        let hard = rq.spec.and_then(|s| s.hard).expect("hard limits");
        assert_eq!(
            hard,
            maplit::btreemap! {
                "limits.cpu".to_string() => Quantity("1000m".to_string()),
                "limits.memory".to_string() => Quantity("2Gi".to_string()),
            }
        );
    }
}
