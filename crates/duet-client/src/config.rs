//! Client configuration loaded from environment variables.

use std::time::Duration;

use duet_shared::constants::{DEFAULT_HTTP_PORT, SOCKET_PATH};
use duet_shared::UserId;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the chat server.
    /// Env: `DUET_SERVER_URL`
    /// Default: `http://localhost:5000`
    pub server_url: String,

    /// Identity to act as.
    /// Env: `DUET_USER_ID`
    pub user_id: Option<UserId>,

    /// Bound on every REST call.
    /// Env: `DUET_REQUEST_TIMEOUT_SECS`
    /// Default: `15`
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            user_id: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DUET_SERVER_URL") {
            config.server_url = url.trim().trim_end_matches('/').to_string();
        }

        if let Some(val) = lookup("DUET_USER_ID") {
            match val.parse::<UserId>() {
                Ok(id) => config.user_id = Some(id),
                Err(_) => tracing::warn!(value = %val, "Invalid DUET_USER_ID, ignoring"),
            }
        }

        if let Some(val) = lookup("DUET_REQUEST_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.request_timeout = Duration::from_secs(n),
                _ => tracing::warn!(
                    value = %val,
                    "Invalid DUET_REQUEST_TIMEOUT_SECS, using default"
                ),
            }
        }

        config
    }

    /// Event channel URL for `user`: the server URL with a `ws`/`wss`
    /// scheme, the socket path and the `userId` query parameter.
    pub fn socket_url(&self, user: UserId) -> String {
        let base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.server_url.clone()
        };
        format!("{base}{SOCKET_PATH}?userId={user}")
    }
}
