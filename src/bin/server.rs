//! Diagram Collab Relay Server
//!
//! Relays full-document updates and advisory element locks between the
//! participants of each diagram room. Room state lives in memory only.
//!
//! # Configuration
//!
//! Environment variables:
//! - `DIAGRAM_SERVER_PORT`: Port to listen on (default: 8000)
//! - `RUST_LOG`: Log filter (default: `diagram_collab=info,tower_http=info`)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /ws/diagram/{room}/`: WebSocket endpoint for a room

use std::net::SocketAddr;
use std::sync::Arc;

use diagram_collab::server::{router, RoomRegistry};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("DIAGRAM_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        Self { port }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "diagram_collab=info,diagram_collab_server=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let app = router(Arc::new(RoomRegistry::new()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting relay on {}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
