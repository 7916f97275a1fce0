use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::models::{LastMessage, Message, MessageView, UserProfile};
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Event channel (server -> client)
// ---------------------------------------------------------------------------

/// Every event the server pushes over the event channel.
///
/// On the wire each event is a JSON text frame `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Snapshot of every user with a live connection.
    #[serde(rename = "getOnlineUsers")]
    OnlineUsers(Vec<UserId>),

    /// A message was created.
    #[serde(rename = "newMessage")]
    NewMessage(MessageView),

    /// The receiver has seen one of the recipient's messages.
    #[serde(rename = "messageSeen")]
    MessageSeen(MessageSeen),

    /// A message was deleted; payload is tailored to each participant.
    #[serde(rename = "deleteMessage")]
    DeleteMessage(DeleteMessage),

    /// Broadcast notice that a message id no longer exists.
    #[serde(rename = "messageDeleted")]
    MessageDeleted(MessageDeleted),

    /// A user changed their public profile.
    #[serde(rename = "userProfileUpdated")]
    UserProfileUpdated(ProfileUpdated),
}

impl ServerEvent {
    /// Contract name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::OnlineUsers(_) => EVENT_GET_ONLINE_USERS,
            ServerEvent::NewMessage(_) => EVENT_NEW_MESSAGE,
            ServerEvent::MessageSeen(_) => EVENT_MESSAGE_SEEN,
            ServerEvent::DeleteMessage(_) => EVENT_DELETE_MESSAGE,
            ServerEvent::MessageDeleted(_) => EVENT_MESSAGE_DELETED,
            ServerEvent::UserProfileUpdated(_) => EVENT_USER_PROFILE_UPDATED,
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a text frame.
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageSeen {
    pub message_id: MessageId,
    /// The receiver who opened the message.
    pub seen_by: UserId,
    /// Conversation key on the recipient's side (the original sender).
    pub chat_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessage {
    pub message_id: MessageId,
    /// The *other* participant, from the point of view of the recipient.
    pub conversation_id: UserId,
    /// What the conversation's preview should show now; `None` when the
    /// conversation became empty.
    pub new_last_message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdated {
    pub user_id: UserId,
    pub full_name: String,
    pub profile_pic: Option<String>,
    pub bio: String,
}

impl From<&UserProfile> for ProfileUpdated {
    fn from(user: &UserProfile) -> Self {
        Self {
            user_id: user.id,
            full_name: user.full_name.clone(),
            profile_pic: user.profile_pic.clone(),
            bio: user.bio.clone(),
        }
    }
}

/// Query string of the event channel upgrade request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub user_id: UserId,
}

// ---------------------------------------------------------------------------
// REST bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: String,
    /// Base64 data URI (`data:image/png;base64,...`).
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    /// Base64 data URI of a new avatar.
    #[serde(default)]
    pub profile_pic: Option<String>,
}

/// Directory entry pushed by the auth layer after sign-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUserRequest {
    pub full_name: String,
    #[serde(default)]
    pub bio: String,
    /// Avatar URL already hosted elsewhere.
    #[serde(default)]
    pub profile_pic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    pub success: bool,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub new_message: MessageView,
}

/// Contact list with per-conversation previews and unread counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SidebarSummary {
    pub success: bool,
    pub users: Vec<UserProfile>,
    /// Keyed by the other participant.
    pub last_messages: HashMap<UserId, LastMessage>,
    /// Keyed by the sender; only non-zero counts are present.
    pub unseen_messages: HashMap<UserId, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    pub success: bool,
    pub users: Vec<UserProfile>,
    pub unseen_messages: HashMap<UserId, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileResponse {
    pub success: bool,
    pub message: String,
    pub user: UserProfile,
}
