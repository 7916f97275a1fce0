//! Domain models exchanged between the server and its clients.
//!
//! Every struct serializes with camelCase field names, which is the shape the
//! REST responses and event-channel payloads use on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Public profile of a user as known to the chat core.
///
/// Credentials and sign-up live in the external auth service; this is only
/// the part needed to render contacts and expand message participants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub full_name: String,
    /// URL of the avatar image, if the user uploaded one.
    #[serde(default)]
    pub profile_pic: Option<String>,
    #[serde(default)]
    pub bio: String,
    /// Last time the user's event channel disconnected.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// The display fields of a message participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: UserId,
    pub full_name: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

impl From<&UserProfile> for Participant {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id,
            full_name: user.full_name.clone(),
            profile_pic: user.profile_pic.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A direct message between two users.
///
/// `seen` only ever moves from `false` to `true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub text: String,
    /// URL of an attached image in the media store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seen: bool,
}

impl Message {
    /// Whether the message carries any content at all.
    pub fn has_content(&self) -> bool {
        has_content(&self.text, self.image.as_deref())
    }

    /// Whether `user` is one of the two participants.
    pub fn involves(&self, user: UserId) -> bool {
        self.sender_id == user || self.receiver_id == user
    }

    /// The other participant, seen from `me`.
    ///
    /// For a message `me` is not part of, this returns the sender.
    pub fn counterpart(&self, me: UserId) -> UserId {
        if self.sender_id == me {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

/// Content rule shared by every layer: non-blank text or an image.
pub fn has_content(text: &str, image: Option<&str>) -> bool {
    !text.trim().is_empty() || image.is_some_and(|i| !i.trim().is_empty())
}

/// A message with both participants expanded for display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub sender: Participant,
    pub receiver: Participant,
}

// ---------------------------------------------------------------------------
// Sidebar preview
// ---------------------------------------------------------------------------

/// Summary of the most recent message of a conversation, as shown in the
/// contact list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub message_id: MessageId,
    pub text: String,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seen: bool,
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self {
            message_id: m.id,
            text: m.text.clone(),
            image: m.image.clone(),
            created_at: m.created_at,
            seen: m.seen,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
        }
    }
}
