use crate::{
    auth::{OidcConfig, Verifier},
    grpc::{GrpcServerMetricsFamily, RocketServer},
    k8s::{ClientFactory, IssuerKind, LETS_ENCRYPT_DIRECTORY},
    service::LogAggregator,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "chat-api-server",
    about = "An authenticated gRPC gateway for Rocket chat instances"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "chat_api_server=info,warn",
        env = "CHAT_API_SERVER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// Selects the kubeconfig context that scoped clients are derived from.
    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:10000")]
    grpc_addr: SocketAddr,

    #[clap(
        long,
        default_value = "https://localhost:8443/auth/realms/kubernetes",
        env = "OIDC_ISSUER_URL"
    )]
    oidc_issuer_url: String,

    /// The audience that bearer tokens must be issued for.
    #[clap(long, default_value = "kubernetes", env = "OIDC_CLIENT_ID")]
    oidc_client_id: String,

    /// Skips TLS verification when talking to the identity provider.
    ///
    /// Only meant for development against a self-signed identity provider.
    #[clap(long)]
    oidc_insecure_skip_verify: bool,

    #[clap(long, value_enum, default_value = "self-signed")]
    issuer_kind: IssuerKindArg,

    /// ACME directory used when `--issuer-kind=acme`.
    #[clap(long, default_value = LETS_ENCRYPT_DIRECTORY)]
    acme_server: String,

    /// How long a log follower waits after its pod's output runs dry.
    #[clap(long, default_value = "5000")]
    log_follow_backoff_ms: u64,

    #[clap(long, default_value = "16")]
    log_buffer: usize,
}

/// The kind of certificate issuer provisioned for each instance admin.
#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum IssuerKindArg {
    SelfSigned,
    Acme,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            grpc_addr,
            oidc_issuer_url,
            oidc_client_id,
            oidc_insecure_skip_verify,
            issuer_kind,
            acme_server,
            log_follow_backoff_ms,
            log_buffer,
        } = self;

        let mut prom = <Registry>::default();
        let grpc_metrics =
            GrpcServerMetricsFamily::register(prom.sub_registry_with_prefix("grpc_server"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        // Scoped clients reuse the selected cluster endpoint and CA but never
        // its credentials, so load it before the runtime takes the args.
        let base = base_config(&client).await?;

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let verifier = Verifier::discover(OidcConfig {
            issuer_url: oidc_issuer_url,
            client_id: oidc_client_id,
            insecure_skip_verify: oidc_insecure_skip_verify,
        })
        .await?;

        let clients = ClientFactory::new(base, issuer_kind.into_issuer(acme_server));
        let shutdown = CancellationToken::new();
        let server = RocketServer::new(
            Arc::new(verifier),
            clients,
            LogAggregator::new(Duration::from_millis(log_follow_backoff_ms)),
            log_buffer,
            &grpc_metrics,
            shutdown.clone(),
        );

        tokio::spawn(grpc(grpc_addr, server, shutdown, runtime.shutdown_handle()));

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // the gRPC server to drain before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

// === impl IssuerKindArg ===

impl IssuerKindArg {
    fn into_issuer(self, acme_server: String) -> IssuerKind {
        match self {
            Self::SelfSigned => IssuerKind::SelfSigned,
            Self::Acme => IssuerKind::Acme {
                server: acme_server,
            },
        }
    }
}

async fn base_config(client: &kubert::ClientArgs) -> Result<kube::Config> {
    if client.cluster.is_none() && client.context.is_none() && client.user.is_none() {
        return Ok(kube::Config::infer().await?);
    }
    let options = kube::config::KubeConfigOptions {
        cluster: client.cluster.clone(),
        context: client.context.clone(),
        user: client.user.clone(),
    };
    Ok(kube::Config::from_kubeconfig(&options).await?)
}

#[instrument(skip_all, fields(port = %addr.port()))]
async fn grpc(
    addr: SocketAddr,
    server: RocketServer<Verifier, ClientFactory>,
    streams: CancellationToken,
    drain: drain::Watch,
) -> Result<()> {
    let (close_tx, close_rx) = tokio::sync::oneshot::channel();
    tokio::pin! {
        let srv = Server::builder()
            .add_service(server.svc())
            .serve_with_shutdown(addr, close_rx.map(|_| {}));
    }

    info!(%addr, "Rocket gRPC server listening");
    tokio::select! {
        res = (&mut srv) => res?,
        handle = drain.signaled() => {
            // Status and log streams only end when told to; end them so the
            // server can finish draining.
            streams.cancel();
            let _ = close_tx.send(());
            handle.release_after(srv).await?
        }
    }
    Ok(())
}
