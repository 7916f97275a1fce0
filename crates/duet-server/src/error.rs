use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use duet_shared::protocol::FailureResponse;
use duet_shared::ChatError;
use duet_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    /// A domain failure the caller can act on.
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// No identity was supplied by the auth layer.
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Image not found: {0}")]
    MediaNotFound(String),

    #[error("Image too large: {size} bytes (max {max})")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Media storage error: {0}")]
    MediaStorage(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::EmptyMessage => {
                ServerError::Chat(ChatError::Validation("Cannot send empty message".into()))
            }
            StoreError::NotSender => {
                ServerError::Chat(ChatError::Authorization("Not authorized".into()))
            }
            StoreError::NotFound => ServerError::Chat(ChatError::NotFound("Not found".into())),
            other => ServerError::Store(other),
        }
    }
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Chat(e) => StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ServerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ServerError::MediaNotFound(_) => StatusCode::NOT_FOUND,
            ServerError::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::MediaStorage(_) | ServerError::Store(_) | ServerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ServerError::MediaStorage(_) => "Media storage error".to_string(),
            ServerError::Store(e) => {
                tracing::error!(error = %e, "store failure");
                "Internal server error".to_string()
            }
            ServerError::Internal(e) => {
                tracing::error!(error = %e, "internal failure");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = FailureResponse {
            success: false,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        assert!(matches!(
            ServerError::from(StoreError::EmptyMessage),
            ServerError::Chat(ChatError::Validation(_))
        ));
        assert!(matches!(
            ServerError::from(StoreError::NotSender),
            ServerError::Chat(ChatError::Authorization(_))
        ));
        assert!(matches!(
            ServerError::from(StoreError::NotFound),
            ServerError::Chat(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn test_statuses() {
        let cases = [
            (ServerError::Chat(ChatError::Validation("x".into())), 400),
            (ServerError::Chat(ChatError::Authorization("x".into())), 403),
            (ServerError::Chat(ChatError::NotFound("x".into())), 404),
            (ServerError::Chat(ChatError::Dependency("x".into())), 502),
            (ServerError::Unauthenticated, 401),
            (ServerError::Internal("x".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(err.into_response().status().as_u16(), code);
        }
    }
}
