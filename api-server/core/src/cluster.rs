use crate::{BearerToken, Quota, Result, Rocket};
use bytes::Bytes;
use futures::prelude::*;
use std::pin::Pin;

/// Builds cluster clients that act with a caller's own credential.
///
/// A client is built for exactly one call and is dropped when that call
/// returns. Implementations must never fall back to the service's own
/// credential.
pub trait ScopedClients: Send + Sync + 'static {
    type Client: Cluster;

    fn scoped(&self, token: &BearerToken) -> Result<Self::Client>;
}

/// The cluster operations the gateway performs on a caller's behalf.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync + 'static {
    type Logs: LogSource;

    async fn get_rocket(&self, namespace: &str, name: &str) -> Result<Option<Rocket>>;

    /// Lists rockets in `namespace`, or in all namespaces when it is empty.
    async fn list_rockets(&self, namespace: &str) -> Result<Vec<Rocket>>;

    async fn create_rocket(&self, rocket: &Rocket) -> Result<()>;

    async fn delete_rocket(&self, namespace: &str, name: &str) -> Result<()>;

    /// Opens a watch on a single rocket.
    ///
    /// The first notification describes the rocket's current state.
    async fn watch_rocket(&self, namespace: &str, name: &str) -> Result<WatchStream>;

    /// Names of the persistent volume claims mounted by a pod.
    async fn pod_claims(&self, namespace: &str, pod: &str) -> Result<Vec<String>>;

    async fn delete_claim(&self, namespace: &str, claim: &str) -> Result<()>;

    /// Creates a namespace. One that already exists is left as is.
    async fn create_namespace(&self, name: &str) -> Result<()>;

    /// Limits the resources of `namespace`. An existing quota is left as is.
    async fn create_quota(&self, namespace: &str, quota: &Quota) -> Result<()>;

    /// Provisions a certificate issuer for `user` and returns its name.
    async fn create_issuer(&self, namespace: &str, user: &str, email: &str) -> Result<String>;

    /// Returns a following reader of a pod's log output. Nothing is read
    /// until the source is first polled.
    fn pod_logs(&self, namespace: &str, pod: &str) -> Self::Logs;
}

/// A following read of one pod's log output.
#[async_trait::async_trait]
pub trait LogSource: Send + 'static {
    /// Reads the next chunk of output.
    ///
    /// Chunk boundaries carry no meaning: a line may span several chunks.
    /// `Ok(None)` signals a transient end of input; the caller may back off
    /// and read again.
    async fn next_chunk(&mut self) -> std::io::Result<Option<Bytes>>;
}

pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send + 'static>>;

/// A single watch notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    Added(WatchObject),
    Modified(WatchObject),
    Deleted(WatchObject),

    /// A progress marker from the API server; carries no object state.
    Bookmark,
}

/// The object carried by a watch notification, discriminated by kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchObject {
    Rocket(Rocket),
    Other { api_version: String, kind: String },
}
