//! Process lifecycle for the users service.
//!
//! The [`Supervisor`] moves through `Starting → Serving → Draining →
//! Stopped` and publishes each [`Phase`] on a watch channel.
//!
//! ## Startup
//!
//! 1. [`Supervisor::start`] connects to PostgreSQL and applies pending
//!    migrations. Any failure aborts before a listener exists.
//! 2. [`Supervisor::bind`] binds the gRPC and HTTP listeners; both must
//!    succeed.
//! 3. [`Supervisor::serve`] runs the gRPC server and the HTTP gateway as two
//!    tasks. The gateway dials the gRPC listener's own address.
//!
//! ## Shutdown order
//!
//! When the shutdown future resolves (or a server task exits on its own):
//!
//! 1. Health is set to `NOT_SERVING`.
//! 2. The HTTP gateway stops accepting and drains, bounded by the drain
//!    timeout.
//! 3. The gRPC server stops accepting and lets in-flight calls finish.
//! 4. The store connection is closed. Failure here is fatal.
//! 5. Telemetry is flushed and shut down. Failure here is only logged.

use crate::server::{
    config::ServerConfig,
    error::{Error, Result},
    gateway,
    service::UsersService,
    store::{PgUserStore, UserStore},
    telemetry::TelemetryProviders,
};
use core::{fmt, future::Future, net::SocketAddr};
use std::sync::Arc;
use tokio::{net::TcpListener, signal, sync::watch, task::JoinHandle};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_reflection::server::Builder;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use users_api_core::proto::{FILE_DESCRIPTOR_SET, user_service_server::UserServiceServer};

/// Lifecycle phase of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Serving,
    Draining,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Starting => write!(f, "starting"),
            Phase::Serving => write!(f, "serving"),
            Phase::Draining => write!(f, "draining"),
            Phase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Bound gRPC and HTTP listeners.
pub struct Listeners {
    grpc: TcpListener,
    http: TcpListener,
    grpc_addr: SocketAddr,
    http_addr: SocketAddr,
}

impl Listeners {
    /// Binds both addresses. Fails with [`Error::Listener`] naming the first
    /// address that could not be bound.
    pub async fn bind(grpc_addr: SocketAddr, http_addr: SocketAddr) -> Result<Self> {
        let grpc = bind(grpc_addr).await?;
        let http = bind(http_addr).await?;
        Ok(Self {
            grpc_addr: local_addr(&grpc, grpc_addr)?,
            http_addr: local_addr(&http, http_addr)?,
            grpc,
            http,
        })
    }

    /// Actual gRPC address, with any ephemeral port resolved.
    pub const fn grpc_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    /// Actual HTTP address, with any ephemeral port resolved.
    pub const fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }
}

async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| Error::Listener { addr, source })
}

fn local_addr(listener: &TcpListener, addr: SocketAddr) -> Result<SocketAddr> {
    listener
        .local_addr()
        .map_err(|source| Error::Listener { addr, source })
}

/// Owns every long-lived resource of the process and tears them down in a
/// fixed order.
pub struct Supervisor {
    config: ServerConfig,
    store: Arc<dyn UserStore>,
    telemetry: TelemetryProviders,
    phase: watch::Sender<Phase>,
}

impl Supervisor {
    /// Connects to PostgreSQL and applies pending migrations.
    ///
    /// On failure the telemetry providers are dropped, which flushes them.
    pub async fn start(config: ServerConfig, telemetry: TelemetryProviders) -> Result<Self> {
        let store = PgUserStore::connect(&config.database).await?;
        store.migrate().await?;
        Ok(Self::new(config, Arc::new(store), telemetry))
    }

    /// Wraps an already-prepared store.
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn UserStore>,
        telemetry: TelemetryProviders,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Starting);
        Self {
            config,
            store,
            telemetry,
            phase,
        }
    }

    /// Subscribes to phase transitions.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Binds the configured gRPC and HTTP addresses.
    pub async fn bind(&self) -> Result<Listeners> {
        Listeners::bind(self.config.grpc_addr, self.config.http_addr).await
    }

    fn transition(&self, next: Phase) {
        tracing::info!(phase = %next, "Lifecycle transition");
        self.phase.send_replace(next);
    }

    /// Serves both listeners until `shutdown` resolves, then drains.
    ///
    /// Returns an error if a server task failed or the store could not be
    /// closed. Telemetry shutdown failures are logged and ignored.
    pub async fn serve<F>(mut self, listeners: Listeners, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Listeners {
            grpc,
            http,
            grpc_addr,
            http_addr,
        } = listeners;

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<UserServiceServer<UsersService>>()
            .await;

        let service = UsersService::new(Arc::clone(&self.store), self.telemetry.service_metrics());

        let reflection = Builder::configure()
            .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let client = gateway::loopback_client(grpc_addr)?;
        let app = gateway::router(client);

        // Cancelled when either server task returns, whatever the reason.
        let exited = CancellationToken::new();
        let grpc_stop = CancellationToken::new();
        let http_stop = CancellationToken::new();

        let grpc_router = Server::builder()
            .accept_http1(true)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_grpc())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .layer(GrpcWebLayer::new()),
            )
            .add_service(health_service)
            .add_service(reflection)
            .add_service(build_user_service(service));

        let mut grpc_task: JoinHandle<Result<()>> = tokio::spawn({
            let guard = exited.clone().drop_guard();
            let stop = grpc_stop.clone();
            async move {
                let _guard = guard;
                grpc_router
                    .serve_with_incoming_shutdown(TcpListenerStream::new(grpc), stop.cancelled())
                    .await?;
                Ok(())
            }
        });

        let mut http_task: JoinHandle<Result<()>> = tokio::spawn({
            let guard = exited.clone().drop_guard();
            let stop = http_stop.clone();
            async move {
                let _guard = guard;
                axum::serve(http, app)
                    .with_graceful_shutdown(async move { stop.cancelled().await })
                    .await
                    .map_err(Error::Http)
            }
        });

        tracing::info!(%grpc_addr, "gRPC server listening");
        tracing::info!(%http_addr, "HTTP gateway listening");
        self.transition(Phase::Serving);

        tokio::select! {
            () = shutdown => tracing::info!("Shutdown signal received, draining"),
            () = exited.cancelled() => tracing::warn!("A server task exited unexpectedly, draining"),
        }
        self.transition(Phase::Draining);

        let mut failure: Option<Error> = None;

        health_reporter
            .set_not_serving::<UserServiceServer<UsersService>>()
            .await;

        http_stop.cancel();
        match tokio::time::timeout(self.config.drain_timeout, &mut http_task).await {
            Ok(joined) => record(&mut failure, joined, "HTTP gateway"),
            Err(_) => {
                tracing::warn!(
                    timeout = ?self.config.drain_timeout,
                    "HTTP gateway did not drain in time, aborting remaining connections"
                );
                http_task.abort();
            }
        }
        tracing::info!("HTTP gateway stopped");

        grpc_stop.cancel();
        record(&mut failure, (&mut grpc_task).await, "gRPC server");
        tracing::info!("gRPC server stopped");

        if let Err(err) = self.store.close().await {
            tracing::error!(error = %err, "Failed to close store");
            failure = failure.or(Some(err));
        }

        if let Err(err) = self.telemetry.shutdown() {
            tracing::warn!(error = %err, "Telemetry shutdown failed");
        }

        self.transition(Phase::Stopped);
        match failure {
            Some(err) => Err(err),
            None => {
                tracing::info!("Service shut down successfully");
                Ok(())
            }
        }
    }
}

fn record(
    failure: &mut Option<Error>,
    joined: core::result::Result<Result<()>, tokio::task::JoinError>,
    context: &str,
) {
    let err = match joined {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(join_err) => Error::Task {
            context: format!("{context}: {join_err}"),
        },
    };
    tracing::error!(error = %err, "{context} failed");
    if failure.is_none() {
        *failure = Some(err);
    }
}

fn build_user_service(service: UsersService) -> UserServiceServer<UsersService> {
    UserServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
