//! routex backend — HTTP gateway over the route engine and swap executor.
//!
//! Responsibilities:
//! - `GET /quote`, `GET /quote/{id}` — best-route discovery and lookup
//! - `POST /swap/execute`, `POST /swap/simulate` — swap transaction lifecycle
//! - `GET /swap/{id}`, `POST /swap/{id}/cancel` — status and cancellation
//! - Health checks

mod correlation;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

use routex_types::config::RouterConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let config = RouterConfig::from_env().map_err(anyhow::Error::msg)?;

    tracing::info!("routex backend starting...");

    let state = Arc::new(AppState::from_config(config.clone()).await?);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .nest("/api", routes::api_router())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = config.general.bind_addr.parse()?;
    tracing::info!("listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
