use k8s_openapi::{
    api::core::v1::{PersistentVolumeClaimSpec, VolumeResourceRequirements},
    apimachinery::pkg::api::resource::Quantity,
};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A Rocket.Chat instance, reconciled by the chat operator.
///
/// This server only submits and reads these objects; the operator owns the
/// definition and writes the status.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "chat.accso.de",
    version = "v1alpha1",
    kind = "Rocket",
    namespaced,
    status = "RocketStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RocketSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_spec: Option<AdminSpec>,

    #[serde(default)]
    pub database: DatabaseSpec,

    #[serde(default)]
    pub ingress_spec: IngressSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSpec {
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default)]
    pub replicas: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_spec: Option<StorageSpec>,
}

/// An embedded volume claim template for the database.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct StorageSpec {
    #[serde(default)]
    pub spec: PersistentVolumeClaimSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RocketStatus {
    #[serde(default)]
    pub phase: String,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub pods: Vec<RocketPod>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RocketPod {
    pub name: String,
}

// === impl StorageSpec ===

impl StorageSpec {
    /// A claim template requesting `quantity` of storage.
    pub fn request(quantity: impl Into<String>) -> Self {
        Self {
            spec: PersistentVolumeClaimSpec {
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(quantity.into()),
                    )])),
                    ..Default::default()
                }),
                ..Default::default()
            },
        }
    }

    /// The requested storage quantity, if any.
    pub fn storage(&self) -> Option<&str> {
        self.spec
            .resources
            .as_ref()?
            .requests
            .as_ref()?
            .get("storage")
            .map(|q| q.0.as_str())
    }
}
