use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use clap::Parser;
use govproof_core::{MemoryNonceStore, NonceStore};
use govproof_lib::{Config, JsonFileNonceStore};
use tower_http::cors::CorsLayer;

mod routes;
mod state;

use state::AppState;

#[derive(Debug, Parser)]
#[command(name = "govproof-server")]
#[command(about = "HTTP API for balance attestations and sign-in verification")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "GOVPROOF_PORT", default_value = "3000")]
    port: u16,

    /// JSON config with per-contract balance slots and sign-in policy.
    #[arg(long, env = "GOVPROOF_CONFIG")]
    config: Option<PathBuf>,

    /// File that records consumed sign-in nonces. Kept in memory when omitted,
    /// so nonces become reusable after a restart.
    #[arg(long, env = "GOVPROOF_NONCE_DB")]
    nonce_db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "govproof_server=info,govproof_lib=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load_optional(cli.config.as_deref())?;
    let store: Box<dyn NonceStore> = match cli.nonce_db {
        Some(ref path) => Box::new(JsonFileNonceStore::open(path)?),
        None => {
            tracing::warn!("no --nonce-db given; consumed nonces are kept in memory only");
            Box::new(MemoryNonceStore::new())
        }
    };

    tracing::info!(
        contracts = config.contracts.len(),
        domain = config.siwe.domain.as_deref().unwrap_or("-"),
        "starting govproof-server"
    );

    let state = Arc::new(AppState::new(config, store));
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!(%addr, "server listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes::api_router(state))
        .layer(CorsLayer::very_permissive())
}
