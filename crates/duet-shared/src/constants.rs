/// Application name
pub const APP_NAME: &str = "Duet";

/// Default HTTP port for the server (REST + event channel)
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Header carrying the identity established by the upstream auth layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Path of the event channel WebSocket endpoint
pub const SOCKET_PATH: &str = "/socket";

/// Maximum decoded image size in bytes (10 MiB)
pub const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

/// Upper bound on an image upload to the media store
pub const IMAGE_UPLOAD_TIMEOUT_SECS: u64 = 60;

/// Event channel heartbeat interval
pub const SOCKET_HEARTBEAT_SECS: u64 = 15;

/// Event names. These are part of the client contract and must not change.
pub const EVENT_GET_ONLINE_USERS: &str = "getOnlineUsers";
pub const EVENT_NEW_MESSAGE: &str = "newMessage";
pub const EVENT_MESSAGE_SEEN: &str = "messageSeen";
pub const EVENT_DELETE_MESSAGE: &str = "deleteMessage";
pub const EVENT_MESSAGE_DELETED: &str = "messageDeleted";
pub const EVENT_USER_PROFILE_UPDATED: &str = "userProfileUpdated";
