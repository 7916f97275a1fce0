//! # duet-server
//!
//! Chat core for one-to-one messaging.
//!
//! This binary provides:
//! - **REST API** (axum) for sending, fetching, marking seen and deleting
//!   messages, plus the sidebar summary and profile updates
//! - **Event channel** (WebSocket) pushing new messages, seen receipts,
//!   deletions, profile changes and the online-user set
//! - **Image storage** on local disk, served back under `/media`
//!
//! Identity is asserted by an upstream auth layer in the `x-user-id` header.

mod api;
mod config;
mod error;
mod events;
mod media;
mod presence;
mod service;
mod ws;

use std::sync::{Arc, Mutex};

use tracing::info;
use tracing_subscriber::EnvFilter;

use duet_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::events::EventHub;
use crate::media::DiskImageStore;
use crate::presence::PresenceRegistry;
use crate::service::MessageService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,duet_server=debug")),
        )
        .init();

    info!(
        "Starting {} server v{}",
        duet_shared::constants::APP_NAME,
        env!("CARGO_PKG_VERSION")
    );

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;

    // Media store (creates directory if missing)
    let media = Arc::new(
        DiskImageStore::new(
            config.media_storage_path.clone(),
            config.max_image_size,
            config.public_base_url.clone(),
        )
        .await?,
    );

    let hub = EventHub::new(PresenceRegistry::new());
    let service = MessageService::new(
        Arc::new(Mutex::new(db)),
        hub,
        media.clone(),
        config.image_upload_timeout,
    );

    let http_addr = config.http_addr;
    let app_state = AppState {
        service,
        media,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
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
