#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod issuer;
pub mod rocket;

pub use self::{
    issuer::{AcmeIssuer, Issuer, IssuerSpec, SecretKeySelector, SelfSignedIssuer},
    rocket::{Rocket, RocketSpec, RocketStatus},
};
pub use k8s_openapi::{
    api::core::v1::{
        Namespace, PersistentVolumeClaim, PersistentVolumeClaimSpec, Pod, PodSpec,
        ResourceQuota, ResourceQuotaSpec, Secret, Volume, VolumeResourceRequirements,
    },
    apimachinery::pkg::api::resource::Quantity,
};
pub use kube::api::{ObjectMeta, ResourceExt};
