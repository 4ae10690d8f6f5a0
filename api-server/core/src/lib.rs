#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
mod error;
pub mod identity;
pub mod rocket;
pub mod tenant;

pub use self::{
    cluster::{Cluster, LogSource, ScopedClients, WatchEvent, WatchObject, WatchStream},
    error::{AuthError, BoxError, Error, Result},
    identity::{Authenticate, BearerToken, Identity},
    rocket::{CreateRocket, LogLine, Rocket, RocketSpec, RocketStatus, StatusEvent},
    tenant::{Quota, TenantSize},
};

/// Field manager recorded on objects this server writes.
pub const FIELD_MANAGER: &str = "chat-api-server";
