//! parley-relay binary entry point.
//!
//! Usage:
//! ```bash
//! parley-relay --config parley.toml
//! ```
//!
//! Without `--config` the server runs with built-in defaults.

use anyhow::{Context, Result};
use iroh::protocol::Router;
use iroh::Endpoint;
use parley_relay::auth::{Credentials, DevCredentials};
use parley_relay::cleanup::spawn_cleanup_task;
use parley_relay::config::Config;
use parley_relay::http;
use parley_relay::protocol::{ParleyProtocol, ALPN};
use parley_relay::server::ParleyRelay;
use parley_relay::storage::{SqliteStorage, Storage};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_relay=debug")),
        )
        .init();

    info!("starting parley-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = match get_config_path() {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    http::init_start_time();

    let storage: Arc<dyn Storage> = Arc::new(
        SqliteStorage::new(&config.storage.db_path)
            .await
            .context("failed to open database")?,
    );
    let credentials: Arc<dyn Credentials> = Arc::new(DevCredentials::new());
    let relay = Arc::new(ParleyRelay::new(config, storage, credentials));

    let endpoint = Endpoint::builder()
        .alpns(vec![ALPN.to_vec()])
        .bind()
        .await
        .context("failed to bind endpoint")?;
    info!(endpoint_id = %endpoint.id(), "relay endpoint ready");

    let router = Router::builder(endpoint)
        .accept(ALPN, ParleyProtocol::new(Arc::clone(&relay)))
        .spawn();

    let http_task = if relay.config().http.enabled {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", relay.config().http.port))
            .await
            .context("failed to bind http listener")?;
        info!(addr = %listener.local_addr()?, "http listener ready");
        let app = http::build_router(Arc::clone(&relay));
        Some(tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                error!(error = %err, "http listener exited");
            }
        }))
    } else {
        None
    };

    let cleanup = spawn_cleanup_task(Arc::clone(&relay));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    cleanup.abort();
    if let Some(task) = http_task {
        task.abort();
    }
    router
        .shutdown()
        .await
        .context("failed to shutdown router")?;

    Ok(())
}

fn get_config_path() -> Option<PathBuf> {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
}
