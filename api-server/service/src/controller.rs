use chat_api_server_core::{
    rocket::{Admin, Database, Ingress},
    Cluster, CreateRocket, Error, Identity, Result, Rocket, RocketSpec,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const INGRESS_CLASS: &str = "nginx";
pub const ISSUER_ANNOTATION: &str = "cert-manager.io/issuer";

/// Carries out rocket lifecycle requests with one caller's client.
///
/// A controller is built per call around that call's scoped client.
/// Multi-step operations are not transactional: when a step fails, the
/// steps before it are not undone.
#[derive(Debug)]
pub struct RocketController<C> {
    client: C,
}

// === impl RocketController ===

impl<C: Cluster> RocketController<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Provisions an issuer for the admin user, then submits the rocket.
    ///
    /// The request is validated before any cluster call. An empty user or
    /// email is taken from the caller's identity.
    pub async fn create(&self, caller: &Identity, req: CreateRocket) -> Result<()> {
        let req = validate(caller, req)?;

        let issuer = self
            .client
            .create_issuer(&req.namespace, &req.user, &req.email)
            .await?;
        debug!(%issuer, "Issuer ready");

        let rocket = to_rocket(req, issuer);
        info!(name = %rocket.name, namespace = %rocket.namespace, "Creating rocket");
        self.client.create_rocket(&rocket).await
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<Rocket> {
        self.client
            .get_rocket(namespace, name)
            .await?
            .ok_or_else(|| Error::not_found("rocket", namespace, name))
    }

    pub async fn list(&self, namespace: &str) -> Result<Vec<Rocket>> {
        self.client.list_rockets(namespace).await
    }

    /// Deletes the volume claims of every pod in the rocket's status, then
    /// the rocket itself. The first failure stops the sequence.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let rocket = self.get(namespace, name).await?;

        for pod in rocket.pods() {
            for claim in self.client.pod_claims(namespace, pod).await? {
                debug!(%pod, %claim, "Deleting volume claim");
                self.client.delete_claim(namespace, &claim).await?;
            }
        }

        info!(%name, %namespace, "Deleting rocket");
        self.client.delete_rocket(namespace, name).await
    }

    pub async fn update(&self) -> Result<()> {
        Err(Error::Unimplemented("rocket update"))
    }
}

fn validate(caller: &Identity, mut req: CreateRocket) -> Result<CreateRocket> {
    if req.name.is_empty() {
        return Err(Error::validation("name must be set"));
    }
    if req.namespace.is_empty() {
        return Err(Error::validation("namespace must be set"));
    }
    if req.storage_gib <= 0 {
        return Err(Error::validation("database size must be set"));
    }
    if req.replicas < 1 {
        return Err(Error::validation("replicas must be at least 1"));
    }

    if req.user.is_empty() {
        req.user = caller.name.clone();
    }
    if req.email.is_empty() {
        req.email = caller.email.clone();
    }
    if req.user.is_empty() || req.email.is_empty() {
        return Err(Error::validation("admin user and email must be set"));
    }

    req.host = req.host.filter(|h| !h.is_empty());
    Ok(req)
}

fn to_rocket(req: CreateRocket, issuer: String) -> Rocket {
    let CreateRocket {
        name,
        namespace,
        user,
        email,
        host,
        storage_gib,
        replicas,
    } = req;

    let annotations = BTreeMap::from([
        (INGRESS_CLASS_ANNOTATION.to_string(), INGRESS_CLASS.to_string()),
        (ISSUER_ANNOTATION.to_string(), issuer),
    ]);

    Rocket {
        name,
        namespace,
        spec: RocketSpec {
            replicas,
            version: None,
            admin: Admin {
                username: user,
                email,
            },
            ingress: Ingress { host, annotations },
            database: Database {
                replicas,
                version: None,
                storage: Some(format!("{storage_gib}Gi")),
            },
        },
        status: None,
    }
}
