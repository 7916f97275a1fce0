use thiserror::Error;

use duet_shared::ChatError;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The server answered with a structured failure.
    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Collapse into the shared taxonomy for display. Transport failures
    /// become [`ChatError::Connectivity`].
    pub fn into_chat(self) -> ChatError {
        match self {
            ClientError::Chat(e) => e,
            ClientError::Http(e) if e.is_timeout() => {
                ChatError::Connectivity("The server took too long to answer".into())
            }
            ClientError::Http(_) | ClientError::WebSocket(_) => {
                ChatError::Connectivity("Could not reach the server".into())
            }
            ClientError::Decode(_) => {
                ChatError::Connectivity("Unexpected response from the server".into())
            }
            ClientError::Config(m) => ChatError::Validation(m),
        }
    }
}
