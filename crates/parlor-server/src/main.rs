use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parlor_server::api::{self, AppState};
use parlor_server::config::ServerConfig;
use parlor_server::Relay;
use parlor_store::{ChatStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parlor_server=debug")),
        )
        .init();

    info!("Starting Parlor relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Storage and relay
    // -----------------------------------------------------------------------
    let store: Arc<dyn ChatStore> = match &config.database_path {
        Some(path) => Arc::new(SqliteStore::open(path)?),
        None => {
            info!("DATABASE_PATH not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let relay = Arc::new(Relay::new(store, config.missed_call_dedup));
    let state = AppState {
        relay,
        authenticator: config.authenticator(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP server until it fails or Ctrl+C arrives
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
