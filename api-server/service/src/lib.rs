#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod logs;
mod status;
mod tenant;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use self::{
    controller::{RocketController, INGRESS_CLASS, INGRESS_CLASS_ANNOTATION, ISSUER_ANNOTATION},
    logs::{resolve_pods, LineBuffer, LogAggregator},
    status::{relay, StatusRelay, StatusStream},
    tenant::TenantController,
};
