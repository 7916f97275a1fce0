//! Store-side records.
//!
//! The domain models themselves live in `duet-shared`; this module adds the
//! pieces only the store and its writer care about, such as the media store
//! handle of an attached image.

use serde::{Deserialize, Serialize};

pub use duet_shared::models::{LastMessage, Message, UserProfile};
pub use duet_shared::types::{MessageId, UserId};

/// An image that has already been uploaded to the media store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef {
    /// Public URL clients load the image from.
    pub url: String,
    /// Handle used to delete the image from the media store.
    pub public_id: String,
}

/// Input of [`Database::create_message`](crate::Database::create_message).
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub image: Option<ImageRef>,
}

/// A persisted message together with its media store handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: Message,
    pub image_public_id: Option<String>,
}
