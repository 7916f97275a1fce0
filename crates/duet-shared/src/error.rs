use thiserror::Error;

/// Failure categories every layer reports to its caller.
///
/// Each variant carries a short human-readable message suitable for a
/// transient notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    /// The request is malformed, e.g. an empty message.
    #[error("{0}")]
    Validation(String),

    /// The caller may not perform this operation, e.g. deleting someone
    /// else's message.
    #[error("{0}")]
    Authorization(String),

    /// The referenced message or user does not exist.
    #[error("{0}")]
    NotFound(String),

    /// An external collaborator (the media store) failed and no usable
    /// content remained.
    #[error("{0}")]
    Dependency(String),

    /// The server or event channel is unreachable. Never fatal: the client
    /// falls back to REST.
    #[error("{0}")]
    Connectivity(String),
}

impl ChatError {
    /// HTTP status code the server answers with for this category.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::Validation(_) => 400,
            ChatError::Authorization(_) => 403,
            ChatError::NotFound(_) => 404,
            ChatError::Dependency(_) => 502,
            ChatError::Connectivity(_) => 503,
        }
    }

    /// Rebuild the category from a failed response, on the client side.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            400 | 422 => ChatError::Validation(message),
            401 | 403 => ChatError::Authorization(message),
            404 => ChatError::NotFound(message),
            502 | 504 => ChatError::Dependency(message),
            _ => ChatError::Connectivity(message),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ChatError::Validation(m)
            | ChatError::Authorization(m)
            | ChatError::NotFound(m)
            | ChatError::Dependency(m)
            | ChatError::Connectivity(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_category() {
        let errors = [
            ChatError::Validation("Cannot send empty message".into()),
            ChatError::Authorization("Not authorized".into()),
            ChatError::NotFound("Message not found".into()),
            ChatError::Dependency("Failed to upload image".into()),
        ];
        for err in errors {
            let rebuilt = ChatError::from_status(err.status_code(), err.message());
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn test_unknown_status_is_connectivity() {
        let err = ChatError::from_status(500, "boom");
        assert!(matches!(err, ChatError::Connectivity(_)));
        assert_eq!(err.to_string(), "boom");
    }
}
