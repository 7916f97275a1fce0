//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use duet_shared::constants::{DEFAULT_HTTP_PORT, IMAGE_UPLOAD_TIMEOUT_SECS, MAX_IMAGE_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP API and the event channel.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5000`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./duet.db`
    pub database_path: PathBuf,

    /// Directory where uploaded images are stored.
    /// Env: `MEDIA_STORAGE_PATH`
    /// Default: `./media`
    pub media_storage_path: PathBuf,

    /// Base URL clients reach this server at; image URLs are built from it.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:5000`
    pub public_base_url: String,

    /// Maximum decoded image size in bytes.
    /// Env: `MAX_IMAGE_SIZE`
    /// Default: 10 MiB
    pub max_image_size: usize,

    /// Bound on a single image upload; hitting it counts as an upload failure.
    /// Env: `IMAGE_UPLOAD_TIMEOUT_SECS`
    /// Default: `60`
    pub image_upload_timeout: Duration,

    /// Capacity of each connection's outgoing event queue. Events for a
    /// connection whose queue is full are dropped.
    /// Env: `SOCKET_BUFFER`
    /// Default: `256`
    pub socket_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./duet.db"),
            media_storage_path: PathBuf::from("./media"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            max_image_size: MAX_IMAGE_SIZE,
            image_upload_timeout: Duration::from_secs(IMAGE_UPLOAD_TIMEOUT_SECS),
            socket_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(path) = lookup("MEDIA_STORAGE_PATH") {
            config.media_storage_path = PathBuf::from(path);
        }

        if let Some(url) = lookup("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("MAX_IMAGE_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_image_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_IMAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("IMAGE_UPLOAD_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.image_upload_timeout = Duration::from_secs(n),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid IMAGE_UPLOAD_TIMEOUT_SECS, using default"
                ),
            }
        }

        if let Some(val) = lookup("SOCKET_BUFFER") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.socket_buffer = n,
                _ => tracing::warn!(value = %val, "Invalid SOCKET_BUFFER, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Largest request body accepted: a base64 data URI of a maximum-size
    /// image plus some room for the JSON around it.
    pub fn max_body_size(&self) -> usize {
        self.max_image_size / 3 * 4 + 64 * 1024
    }
}
