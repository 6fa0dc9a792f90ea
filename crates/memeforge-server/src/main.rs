//! MemeForge server
//!
//! Hosts exported memes and relays share requests to bot bridges.
//!
//! - `POST /api/upload` with a PNG or JPEG body returns `{ "id", "url" }`
//! - `GET /images/{id}` serves the stored bytes
//! - `POST /api/share` with `{ "image_url", "caption"?, "chat"? }` forwards
//!   the share to every connected bridge
//! - `GET /ws` is the bridge WebSocket, see [`relay`]

mod config;
mod error;
mod relay;
mod routes;
mod state;

use config::ServerConfig;
use state::AppState;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "memeforge_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = config.addr;
    info!("Public URL: {}", config.public_url);
    info!(
        "Upload limit {} bytes, keeping up to {} images",
        config.max_upload_bytes, config.max_images
    );

    let app = routes::router(Arc::new(AppState::new(config)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("MemeForge server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
