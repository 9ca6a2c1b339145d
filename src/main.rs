// src/main.rs

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pochi::config::CONFIG;
use pochi::server;
use pochi::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(CONFIG.log_level.clone())),
        )
        .init();

    let state = AppState::create().await?;
    let app = server::router(state);

    let addr = CONFIG.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
