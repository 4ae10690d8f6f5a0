use crate::{
    error::to_status,
    metrics::{GrpcServerMetricsFamily, GrpcServerRPCMetrics, ResponseObserver},
    proto::{
        self,
        rocket_service_server::{RocketService, RocketServiceServer},
    },
};
use chat_api_server_core::{
    AuthError, Authenticate, BearerToken, Cluster, CreateRocket, Error, Identity, LogLine, Result,
    Rocket, ScopedClients, TenantSize,
};
use chat_api_server_service::{
    resolve_pods, LogAggregator, RocketController, StatusRelay, StatusStream as StatusEvents,
    TenantController,
};
use futures::prelude::*;
use std::{pin::Pin, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tracing::{field, info_span, Instrument, Span};


const SERVICE: &str = "rocket.v1.RocketService";

type BoxResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, tonic::Status>> + Send + 'static>>;

/// Serves `rocket.v1.RocketService`.
///
/// Every call is authenticated before anything else happens, then served with
/// a cluster client built for that call from the caller's own token.
#[derive(Debug)]
pub struct RocketServer<A, F> {
    authenticator: Arc<A>,
    clients: F,
    logs: LogAggregator,
    log_buffer: usize,
    shutdown: CancellationToken,
    metrics: RpcMetrics,
}

#[derive(Clone, Debug)]
struct RpcMetrics {
    register: GrpcServerRPCMetrics,
    create: GrpcServerRPCMetrics,
    update: GrpcServerRPCMetrics,
    get: GrpcServerRPCMetrics,
    get_all: GrpcServerRPCMetrics,
    delete: GrpcServerRPCMetrics,
    status: GrpcServerRPCMetrics,
    logs: GrpcServerRPCMetrics,
}

/// A log aggregation running on behalf of one call.
struct LogTask {
    lines: mpsc::Receiver<LogLine>,
    task: JoinHandle<Result<()>>,
    cancel: CancellationToken,
}

// === impl RocketServer ===

impl<A, F> RocketServer<A, F>
where
    A: Authenticate,
    F: ScopedClients,
{
    pub fn new(
        authenticator: Arc<A>,
        clients: F,
        logs: LogAggregator,
        log_buffer: usize,
        metrics: &GrpcServerMetricsFamily,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            authenticator,
            clients,
            logs,
            log_buffer: log_buffer.max(1),
            shutdown,
            metrics: RpcMetrics::new(metrics),
        }
    }

    pub fn svc(self) -> RocketServiceServer<Self> {
        RocketServiceServer::new(self)
    }

    /// Verifies the caller and builds a cluster client for this call only.
    async fn authorize(&self, metadata: &MetadataMap) -> Result<(Identity, F::Client)> {
        let token = bearer(metadata)?;
        let identity = self.authenticator.authenticate(&token).await?;
        Span::current().record("subject", field::display(&identity.subject));
        let client = self.clients.scoped(&token)?;
        Ok((identity, client))
    }

    async fn register_tenant(
        &self,
        metadata: &MetadataMap,
        req: proto::RegisterRequest,
    ) -> Result<proto::RegisterResponse> {
        let (identity, client) = self.authorize(metadata).await?;
        TenantController::new(client)
            .register(&identity, &req.username, tenant_size(req.size))
            .await?;
        Ok(proto::RegisterResponse {})
    }

    async fn create_rocket(
        &self,
        metadata: &MetadataMap,
        req: proto::CreateRequest,
    ) -> Result<proto::CreateResponse> {
        let (identity, client) = self.authorize(metadata).await?;
        let proto::CreateRequest {
            name,
            namespace,
            user,
            email,
            host,
            database_size,
            replicas,
        } = req;
        let create = CreateRocket {
            name,
            namespace,
            user,
            email,
            host: Some(host),
            storage_gib: database_size,
            replicas,
        };
        RocketController::new(client)
            .create(&identity, create)
            .await?;
        Ok(proto::CreateResponse {})
    }

    async fn update_rocket(&self, metadata: &MetadataMap) -> Result<proto::UpdateResponse> {
        let (_, client) = self.authorize(metadata).await?;
        RocketController::new(client).update().await?;
        Ok(proto::UpdateResponse {})
    }

    async fn get_rocket(
        &self,
        metadata: &MetadataMap,
        req: proto::GetRequest,
    ) -> Result<proto::GetResponse> {
        let (_, client) = self.authorize(metadata).await?;
        require_target(&req.name, &req.namespace)?;
        let rocket = RocketController::new(client)
            .get(&req.namespace, &req.name)
            .await?;
        Ok(to_response(&rocket))
    }

    async fn list_rockets(
        &self,
        metadata: &MetadataMap,
        req: proto::GetAllRequest,
    ) -> Result<proto::GetAllResponse> {
        let (_, client) = self.authorize(metadata).await?;
        let rockets = RocketController::new(client).list(&req.namespace).await?;
        Ok(proto::GetAllResponse {
            rockets: rockets.iter().map(to_response).collect(),
        })
    }

    async fn delete_rocket(
        &self,
        metadata: &MetadataMap,
        req: proto::DeleteRequest,
    ) -> Result<proto::DeleteResponse> {
        let (_, client) = self.authorize(metadata).await?;
        require_target(&req.name, &req.namespace)?;
        RocketController::new(client)
            .delete(&req.namespace, &req.name)
            .await?;
        Ok(proto::DeleteResponse {})
    }

    async fn watch_status(
        &self,
        metadata: &MetadataMap,
        req: proto::StatusRequest,
    ) -> Result<StatusEvents> {
        let (_, client) = self.authorize(metadata).await?;
        require_target(&req.name, &req.namespace)?;
        StatusRelay::new(self.shutdown.clone())
            .watch(&client, &req.namespace, &req.name)
            .await
    }

    async fn follow_logs(&self, metadata: &MetadataMap, req: proto::LogsRequest) -> Result<LogTask> {
        let (_, client) = self.authorize(metadata).await?;
        let proto::LogsRequest {
            name,
            namespace,
            pod,
        } = req;
        require_target(&name, &namespace)?;

        let controller = RocketController::new(client);
        let rocket = controller.get(&namespace, &name).await?;
        let pods = resolve_pods(&rocket, Some(pod.as_str()).filter(|p| !p.is_empty()));
        tracing::debug!(?pods, "Following logs");
        let sources = pods
            .into_iter()
            .map(|pod| {
                let logs = controller.client().pod_logs(&namespace, &pod);
                (pod, logs)
            })
            .collect::<Vec<_>>();

        let (tx, lines) = mpsc::channel(self.log_buffer);
        let cancel = self.shutdown.child_token();
        let aggregator = self.logs.clone();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { aggregator.run(sources, tx, cancel).await }.in_current_span()
        });
        Ok(LogTask {
            lines,
            task,
            cancel,
        })
    }
}

#[async_trait::async_trait]
impl<A, F> RocketService for RocketServer<A, F>
where
    A: Authenticate,
    F: ScopedClients,
{
    async fn register(
        &self,
        req: tonic::Request<proto::RegisterRequest>,
    ) -> Result<tonic::Response<proto::RegisterResponse>, tonic::Status> {
        let observer = self.metrics.register.start();
        let span = call_span("register", "", &req.get_ref().username);
        let (metadata, _, req) = req.into_parts();
        let res = self.register_tenant(&metadata, req).instrument(span).await;
        respond(observer, res)
    }

    async fn create(
        &self,
        req: tonic::Request<proto::CreateRequest>,
    ) -> Result<tonic::Response<proto::CreateResponse>, tonic::Status> {
        let observer = self.metrics.create.start();
        let span = call_span("create", &req.get_ref().name, &req.get_ref().namespace);
        let (metadata, _, req) = req.into_parts();
        let res = self.create_rocket(&metadata, req).instrument(span).await;
        respond(observer, res)
    }

    async fn update(
        &self,
        req: tonic::Request<proto::UpdateRequest>,
    ) -> Result<tonic::Response<proto::UpdateResponse>, tonic::Status> {
        let observer = self.metrics.update.start();
        let span = call_span("update", &req.get_ref().name, &req.get_ref().namespace);
        let res = self.update_rocket(req.metadata()).instrument(span).await;
        respond(observer, res)
    }

    async fn get(
        &self,
        req: tonic::Request<proto::GetRequest>,
    ) -> Result<tonic::Response<proto::GetResponse>, tonic::Status> {
        let observer = self.metrics.get.start();
        let span = call_span("get", &req.get_ref().name, &req.get_ref().namespace);
        let (metadata, _, req) = req.into_parts();
        let res = self.get_rocket(&metadata, req).instrument(span).await;
        respond(observer, res)
    }

    async fn get_all(
        &self,
        req: tonic::Request<proto::GetAllRequest>,
    ) -> Result<tonic::Response<proto::GetAllResponse>, tonic::Status> {
        let observer = self.metrics.get_all.start();
        let span = call_span("get_all", "", &req.get_ref().namespace);
        let (metadata, _, req) = req.into_parts();
        let res = self.list_rockets(&metadata, req).instrument(span).await;
        respond(observer, res)
    }

    async fn delete(
        &self,
        req: tonic::Request<proto::DeleteRequest>,
    ) -> Result<tonic::Response<proto::DeleteResponse>, tonic::Status> {
        let observer = self.metrics.delete.start();
        let span = call_span("delete", &req.get_ref().name, &req.get_ref().namespace);
        let (metadata, _, req) = req.into_parts();
        let res = self.delete_rocket(&metadata, req).instrument(span).await;
        respond(observer, res)
    }

    type StatusStream = BoxResponseStream<proto::StatusResponse>;

    async fn status(
        &self,
        req: tonic::Request<proto::StatusRequest>,
    ) -> Result<tonic::Response<Self::StatusStream>, tonic::Status> {
        let observer = self.metrics.status.start();
        let span = call_span("status", &req.get_ref().name, &req.get_ref().namespace);
        let (metadata, _, req) = req.into_parts();
        match self.watch_status(&metadata, req).instrument(span).await {
            Ok(events) => Ok(tonic::Response::new(status_stream(events, observer))),
            Err(error) => Err(fail(observer, error)),
        }
    }

    type LogsStream = BoxResponseStream<proto::LogsResponse>;

    async fn logs(
        &self,
        req: tonic::Request<proto::LogsRequest>,
    ) -> Result<tonic::Response<Self::LogsStream>, tonic::Status> {
        let observer = self.metrics.logs.start();
        let span = call_span("logs", &req.get_ref().name, &req.get_ref().namespace);
        let (metadata, _, req) = req.into_parts();
        match self.follow_logs(&metadata, req).instrument(span).await {
            Ok(logs) => Ok(tonic::Response::new(logs_stream(logs, observer))),
            Err(error) => Err(fail(observer, error)),
        }
    }
}

// === impl RpcMetrics ===

impl RpcMetrics {
    fn new(family: &GrpcServerMetricsFamily) -> Self {
        Self {
            register: family.unary_rpc(SERVICE, "Register"),
            create: family.unary_rpc(SERVICE, "Create"),
            update: family.unary_rpc(SERVICE, "Update"),
            get: family.unary_rpc(SERVICE, "Get"),
            get_all: family.unary_rpc(SERVICE, "GetAll"),
            delete: family.unary_rpc(SERVICE, "Delete"),
            status: family.server_stream_rpc(SERVICE, "Status"),
            logs: family.server_stream_rpc(SERVICE, "Logs"),
        }
    }
}

fn call_span(method: &'static str, name: &str, namespace: &str) -> Span {
    info_span!("rpc", %method, %name, %namespace, subject = field::Empty)
}

fn bearer(metadata: &MetadataMap) -> Result<BearerToken, AuthError> {
    let value = metadata.get("authorization").ok_or(AuthError::Missing)?;
    let value = value.to_str().map_err(|_| AuthError::Malformed)?;
    BearerToken::from_header(value)
}

fn require_target(name: &str, namespace: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("name must be set"));
    }
    if namespace.is_empty() {
        return Err(Error::validation("namespace must be set"));
    }
    Ok(())
}

fn respond<T>(
    observer: ResponseObserver,
    res: Result<T>,
) -> Result<tonic::Response<T>, tonic::Status> {
    let res = res.map(tonic::Response::new).map_err(to_status);
    observer.end_with(&res);
    res
}

fn fail(observer: ResponseObserver, error: Error) -> tonic::Status {
    let status = to_status(error);
    observer.end(status.code());
    status
}

/// Unspecified and unknown sizes map to `None`.
fn tenant_size(size: i32) -> Option<TenantSize> {
    use proto::register_request::Size;
    match Size::try_from(size).ok()? {
        Size::Unspecified => None,
        Size::Small => Some(TenantSize::Small),
        Size::Medium => Some(TenantSize::Medium),
        Size::Large => Some(TenantSize::Large),
    }
}

fn to_response(rocket: &Rocket) -> proto::GetResponse {
    proto::GetResponse {
        name: rocket.name.clone(),
        namespace: rocket.namespace.clone(),
        status: rocket.message().to_string(),
        phase: rocket.phase().to_string(),
        ready: rocket.is_ready(),
        pods: rocket.pods().to_vec(),
        replicas: rocket.spec.replicas,
        host: rocket.spec.ingress.host.clone().unwrap_or_default(),
        webserver_version: rocket.spec.version.clone().unwrap_or_default(),
        mongodb_version: rocket.spec.database.version.clone().unwrap_or_default(),
        database_size: rocket.spec.database.storage.clone().unwrap_or_default(),
    }
}

fn status_stream(
    mut events: StatusEvents,
    observer: ResponseObserver,
) -> BoxResponseStream<proto::StatusResponse> {
    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    observer.msg_sent();
                    yield Ok(proto::StatusResponse {
                        status: event.message,
                        phase: event.phase,
                        ready: event.ready,
                    });
                }
                Err(error) => {
                    yield Err(fail(observer, error));
                    return;
                }
            }
        }
    })
}

fn logs_stream(
    logs: LogTask,
    observer: ResponseObserver,
) -> BoxResponseStream<proto::LogsResponse> {
    let LogTask {
        mut lines,
        task,
        cancel,
    } = logs;
    // Dropping the response stops the aggregation.
    let guard = cancel.drop_guard();

    Box::pin(async_stream::stream! {
        let _guard = guard;
        while let Some(LogLine { pod, message }) = lines.recv().await {
            observer.msg_sent();
            yield Ok(proto::LogsResponse { pod, message });
        }

        let res = match task.await {
            Ok(res) => res,
            Err(error) => Err(Error::stream(format!("log aggregation failed: {error}"))),
        };
        if let Err(error) = res {
            yield Err(fail(observer, error));
        }
    })
}
