use clap::Parser;
use users_api_server::server::{
    config::{CliArgs, ServerConfig},
    supervisor::{Supervisor, shutdown_signal},
    telemetry::init_telemetry,
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(&config.telemetry)?;

    if cfg!(debug_assertions) {
        tracing::info!("Starting users service with full config: {:#?}", config);
    } else {
        tracing::info!(
            grpc_addr = %config.grpc_addr,
            http_addr = %config.http_addr,
            db_host = %config.database.host,
            db_name = %config.database.name,
            "Starting users service"
        );
    }

    let supervisor = Supervisor::start(config, providers).await?;
    let listeners = supervisor.bind().await?;
    supervisor.serve(listeners, shutdown_signal()).await?;
    Ok(())
}
