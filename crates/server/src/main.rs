mod api;
mod endpoints;
mod metrics;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use socket_runtime::{EndpointTable, Runtime, RuntimeConfig};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = "socket.toml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    info!("starting socketry server");
    let metrics_handle = metrics::install_recorder()?;
    let config = if Path::new(CONFIG_FILE).exists() {
        info!("loading runtime config from {CONFIG_FILE}");
        RuntimeConfig::from_file(CONFIG_FILE)
            .with_context(|| format!("failed to load runtime config from {CONFIG_FILE}"))?
    } else {
        warn!("{CONFIG_FILE} not found, using default runtime config");
        RuntimeConfig::default()
    };

    let mut table = EndpointTable::new();
    endpoints::register_endpoints(&mut table).context("failed to register endpoints")?;
    for endpoint in table.iter() {
        info!(
            path = endpoint.path(),
            execution_mode = ?endpoint.execution_mode(),
            "endpoint available"
        );
    }

    let bind_addr = config.bind_addr.clone();
    let runtime =
        Arc::new(Runtime::new(config, table).context("failed to initialize socket runtime")?);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(%bind_addr, "server is ready, press Ctrl+C to shut down");

    axum::serve(
        listener,
        api::create_router(Arc::clone(&runtime), metrics_handle),
    )
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&runtime)))
        .await
        .context("server error")?;

    info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal(runtime: Arc<Runtime>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received, closing connections");
    let closed = runtime.shutdown().await;
    info!(closed, "connections closed");
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    Ok(())
}
