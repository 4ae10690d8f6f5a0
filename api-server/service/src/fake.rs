//! An in-memory cluster for tests.
//!
//! The fake records every call it receives so tests can assert which cluster
//! operations a request performed (or that it performed none).

use bytes::Bytes;
use chat_api_server_core::{
    AuthError, Authenticate, BearerToken, Cluster, Error, Identity, LogSource, Quota, Result,
    Rocket, RocketStatus, ScopedClients, WatchEvent, WatchObject, WatchStream,
};
use futures::future;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
    open_logs: Arc<AtomicUsize>,
}

/// Hands out [`FakeCluster`] handles and remembers the tokens it was given.
#[derive(Clone, Debug, Default)]
pub struct FakeClients {
    cluster: FakeCluster,
    tokens: Arc<Mutex<Vec<String>>>,
}

/// Accepts a fixed set of tokens.
#[derive(Clone, Debug, Default)]
pub struct FakeAuthenticator {
    tokens: HashMap<String, Identity>,
}

/// Feeds output into a pod's fake log stream.
#[derive(Clone, Debug)]
pub struct LogFeed {
    tx: mpsc::UnboundedSender<io::Result<Option<Bytes>>>,
}

#[derive(Debug)]
pub struct FakeLogs {
    rx: mpsc::UnboundedReceiver<io::Result<Option<Bytes>>>,
    open: Arc<AtomicUsize>,
}

#[derive(Debug, Default)]
struct State {
    rockets: BTreeMap<(String, String), Rocket>,
    namespaces: BTreeSet<String>,
    quotas: HashMap<String, Quota>,
    claims: HashMap<String, Vec<String>>,
    logs: HashMap<String, mpsc::UnboundedReceiver<io::Result<Option<Bytes>>>>,
    watches: Vec<Watcher>,
    failures: HashMap<&'static str, u16>,
    calls: Vec<String>,
}

#[derive(Debug)]
struct Watcher {
    namespace: String,
    name: String,
    tx: mpsc::UnboundedSender<Result<WatchEvent>>,
}

// === impl FakeCluster ===

impl FakeCluster {
    pub fn with_rocket(self, rocket: Rocket) -> Self {
        self.insert_rocket(rocket);
        self
    }

    pub fn insert_rocket(&self, rocket: Rocket) {
        let key = (rocket.namespace.clone(), rocket.name.clone());
        self.state.lock().rockets.insert(key, rocket);
    }

    pub fn rocket(&self, namespace: &str, name: &str) -> Option<Rocket> {
        self.state
            .lock()
            .rockets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Records the claims mounted by `pod`.
    pub fn with_claims<I, S>(self, pod: &str, claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.state.lock().claims.insert(
            pod.to_string(),
            claims.into_iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn claims(&self, pod: &str) -> Vec<String> {
        self.state
            .lock()
            .claims
            .get(pod)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.lock().namespaces.contains(name)
    }

    pub fn quota(&self, namespace: &str) -> Option<Quota> {
        self.state.lock().quotas.get(namespace).copied()
    }

    /// Makes the next and every later call of `op` fail with `code`.
    pub fn fail(&self, op: &'static str, code: u16) {
        self.state.lock().failures.insert(op, code);
    }

    /// Registers the log stream of `pod` and returns a handle that feeds it.
    pub fn pod_log(&self, pod: &str) -> LogFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().logs.insert(pod.to_string(), rx);
        LogFeed { tx }
    }

    /// Replaces a rocket's status and notifies its watchers.
    pub fn set_status(&self, namespace: &str, name: &str, status: RocketStatus) {
        let mut state = self.state.lock();
        let key = (namespace.to_string(), name.to_string());
        let Some(rocket) = state.rockets.get_mut(&key) else {
            return;
        };
        rocket.status = Some(status);
        let event = WatchEvent::Modified(WatchObject::Rocket(rocket.clone()));
        state.notify(namespace, name, Ok(event));
    }

    /// Delivers an arbitrary watch item to the watchers of a rocket.
    pub fn push_watch(&self, namespace: &str, name: &str, item: Result<WatchEvent>) {
        self.state.lock().notify(namespace, name, item);
    }

    /// Ends every open watch stream.
    pub fn close_watches(&self) {
        self.state.lock().watches.clear();
    }

    pub fn open_watches(&self) -> usize {
        let mut state = self.state.lock();
        state.watches.retain(|w| !w.tx.is_closed());
        state.watches.len()
    }

    pub fn open_logs(&self) -> usize {
        self.open_logs.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    fn call(&self, op: &'static str, args: impl std::fmt::Display) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(format!("{op} {args}"));
        match state.failures.get(op) {
            Some(&code) => Err(Error::upstream(
                "fake cluster failure",
                Some(code),
                format!("{op} failed"),
            )),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Cluster for FakeCluster {
    type Logs = FakeLogs;

    async fn get_rocket(&self, namespace: &str, name: &str) -> Result<Option<Rocket>> {
        self.call("get_rocket", format_args!("{namespace}/{name}"))?;
        Ok(self.rocket(namespace, name))
    }

    async fn list_rockets(&self, namespace: &str) -> Result<Vec<Rocket>> {
        self.call("list_rockets", namespace)?;
        Ok(self
            .state
            .lock()
            .rockets
            .values()
            .filter(|r| namespace.is_empty() || r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn create_rocket(&self, rocket: &Rocket) -> Result<()> {
        self.call(
            "create_rocket",
            format_args!("{}/{}", rocket.namespace, rocket.name),
        )?;
        let key = (rocket.namespace.clone(), rocket.name.clone());
        let mut state = self.state.lock();
        if state.rockets.contains_key(&key) {
            return Err(Error::upstream(
                "failed to create rocket",
                Some(409),
                "already exists",
            ));
        }
        state.rockets.insert(key, rocket.clone());
        Ok(())
    }

    async fn delete_rocket(&self, namespace: &str, name: &str) -> Result<()> {
        self.call("delete_rocket", format_args!("{namespace}/{name}"))?;
        let key = (namespace.to_string(), name.to_string());
        match self.state.lock().rockets.remove(&key) {
            Some(_) => Ok(()),
            None => Err(Error::not_found("rocket", namespace, name)),
        }
    }

    async fn watch_rocket(&self, namespace: &str, name: &str) -> Result<WatchStream> {
        self.call("watch_rocket", format_args!("{namespace}/{name}"))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        if let Some(rocket) = state
            .rockets
            .get(&(namespace.to_string(), name.to_string()))
        {
            let _ = tx.send(Ok(WatchEvent::Added(WatchObject::Rocket(rocket.clone()))));
        }
        state.watches.push(Watcher {
            namespace: namespace.to_string(),
            name: name.to_string(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn pod_claims(&self, namespace: &str, pod: &str) -> Result<Vec<String>> {
        self.call("pod_claims", format_args!("{namespace}/{pod}"))?;
        Ok(self.claims(pod))
    }

    async fn delete_claim(&self, namespace: &str, claim: &str) -> Result<()> {
        self.call("delete_claim", format_args!("{namespace}/{claim}"))?;
        let mut state = self.state.lock();
        for claims in state.claims.values_mut() {
            claims.retain(|c| c != claim);
        }
        Ok(())
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        self.call("create_namespace", name)?;
        self.state.lock().namespaces.insert(name.to_string());
        Ok(())
    }

    async fn create_quota(&self, namespace: &str, quota: &Quota) -> Result<()> {
        self.call(
            "create_quota",
            format_args!("{namespace} {} {}", quota.cpu(), quota.memory()),
        )?;
        self.state
            .lock()
            .quotas
            .entry(namespace.to_string())
            .or_insert(*quota);
        Ok(())
    }

    async fn create_issuer(&self, namespace: &str, user: &str, email: &str) -> Result<String> {
        self.call("create_issuer", format_args!("{namespace}/{user} {email}"))?;
        Ok(format!("{user}-issuer"))
    }

    fn pod_logs(&self, namespace: &str, pod: &str) -> FakeLogs {
        let _ = self.call("pod_logs", format_args!("{namespace}/{pod}"));
        let rx = match self.state.lock().logs.remove(pod) {
            Some(rx) => rx,
            None => mpsc::unbounded_channel().1,
        };
        self.open_logs.fetch_add(1, Ordering::SeqCst);
        FakeLogs {
            rx,
            open: self.open_logs.clone(),
        }
    }
}

// === impl State ===

impl State {
    fn notify(&mut self, namespace: &str, name: &str, item: Result<WatchEvent>) {
        let mut item = Some(item);
        self.watches.retain(|w| !w.tx.is_closed());
        let watchers = self
            .watches
            .iter()
            .filter(|w| w.namespace == namespace && w.name == name)
            .collect::<Vec<_>>();
        let last = watchers.len().saturating_sub(1);
        for (i, w) in watchers.into_iter().enumerate() {
            let item = if i == last {
                item.take()
            } else {
                item.as_ref().map(clone_item)
            };
            if let Some(item) = item {
                let _ = w.tx.send(item);
            }
        }
    }
}

fn clone_item(item: &Result<WatchEvent>) -> Result<WatchEvent> {
    match item {
        Ok(event) => Ok(event.clone()),
        Err(Error::Stream(msg)) => Err(Error::Stream(msg.clone())),
        Err(error) => Err(Error::stream(error)),
    }
}

// === impl FakeClients ===

impl FakeClients {
    pub fn new(cluster: FakeCluster) -> Self {
        Self {
            cluster,
            tokens: Default::default(),
        }
    }

    pub fn cluster(&self) -> &FakeCluster {
        &self.cluster
    }

    /// Tokens presented to [`ScopedClients::scoped`], in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

impl ScopedClients for FakeClients {
    type Client = FakeCluster;

    fn scoped(&self, token: &BearerToken) -> Result<FakeCluster> {
        self.tokens.lock().push(token.expose().to_string());
        Ok(self.cluster.clone())
    }
}

// === impl FakeAuthenticator ===

impl FakeAuthenticator {
    pub fn with_token(mut self, token: &str, identity: Identity) -> Self {
        self.tokens.insert(token.to_string(), identity);
        self
    }
}

#[async_trait::async_trait]
impl Authenticate for FakeAuthenticator {
    async fn authenticate(&self, token: &BearerToken) -> Result<Identity, AuthError> {
        self.tokens
            .get(token.expose())
            .cloned()
            .ok_or_else(|| AuthError::Invalid("unknown token".to_string()))
    }
}

// === impl LogFeed ===

impl LogFeed {
    pub fn chunk(&self, data: &str) -> &Self {
        let _ = self.tx.send(Ok(Some(Bytes::copy_from_slice(data.as_bytes()))));
        self
    }

    /// Signals a transient end of input.
    pub fn eof(&self) -> &Self {
        let _ = self.tx.send(Ok(None));
        self
    }

    pub fn fail(&self, msg: &str) -> &Self {
        let _ = self.tx.send(Err(io::Error::other(msg.to_string())));
        self
    }
}

// === impl FakeLogs ===

#[async_trait::async_trait]
impl LogSource for FakeLogs {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        match self.rx.recv().await {
            Some(item) => item,
            // Nothing more will be written; behave like an idle follow.
            None => future::pending().await,
        }
    }
}

impl Drop for FakeLogs {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
