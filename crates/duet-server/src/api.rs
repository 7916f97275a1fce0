use std::str::FromStr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, DefaultBodyLimit, FromRequestParts, Path, State},
    http::{header, request::Parts, Method},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use duet_shared::constants::{SOCKET_PATH, USER_ID_HEADER};
use duet_shared::protocol::{
    ConversationResponse, RegisterUserRequest, SendMessageRequest, SendMessageResponse,
    SidebarSummary, SuccessResponse, UpdateProfileRequest, UpdateProfileResponse, UserResponse,
    UsersResponse,
};
use duet_shared::{ChatError, MessageId, UserId};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::media::{content_type_for, DiskImageStore};
use crate::service::MessageService;
use crate::ws::socket_handler;

#[derive(Clone)]
pub struct AppState {
    pub service: MessageService,
    pub media: Arc<DiskImageStore>,
    pub config: Arc<ServerConfig>,
}

/// Caller identity, as asserted by the upstream auth layer.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<UserId>().ok())
            .map(AuthUser)
            .ok_or(ServerError::Unauthenticated)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/api/status", get(status))
        .route(
            "/api/messages/conversation/:other_user_id",
            get(get_conversation),
        )
        .route("/api/messages/mark/:message_id", get(mark_seen))
        .route("/api/messages/send/:other_user_id", post(send_message))
        .route("/api/messages/delete/:message_id", delete(delete_message))
        .route("/api/messages/sidebar-summary", get(sidebar_summary))
        .route("/api/messages/users", get(users_for_sidebar))
        .route("/api/auth/sync-user", post(sync_user))
        .route("/api/auth/update-profile", put(update_profile))
        .route("/media/:id", get(media_download))
        .route(SOCKET_PATH, get(socket_handler))
        .layer(DefaultBodyLimit::max(state.config.max_body_size()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    online_users: usize,
}

fn parse_id<T: FromStr>(raw: &str) -> Result<T, ServerError> {
    raw.parse()
        .map_err(|_| ChatError::Validation("Invalid id".into()).into())
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.service.hub().presence().snapshot().await.len(),
    })
}

async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(other): Path<String>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let other: UserId = parse_id(&other)?;
    let messages = state.service.fetch_conversation(me, other).await?;
    Ok(Json(ConversationResponse {
        success: true,
        messages,
    }))
}

async fn mark_seen(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let message_id: MessageId = parse_id(&message_id)?;
    state.service.mark_seen(me, message_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(other): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ServerError> {
    let other: UserId = parse_id(&other)?;
    let request = json_body(payload)?;
    let new_message = state.service.send(me, other, request).await?;
    Ok(Json(SendMessageResponse {
        success: true,
        new_message,
    }))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    Path(message_id): Path<String>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let message_id: MessageId = parse_id(&message_id)?;
    state.service.delete(me, message_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn sidebar_summary(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<SidebarSummary>, ServerError> {
    Ok(Json(state.service.sidebar_summary(me)?))
}

async fn users_for_sidebar(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
) -> Result<Json<UsersResponse>, ServerError> {
    Ok(Json(state.service.users_with_unseen(me)?))
}

async fn sync_user(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    payload: Result<Json<RegisterUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ServerError> {
    let request = json_body(payload)?;
    let user = state.service.register_user(me, request).await?;
    Ok(Json(UserResponse {
        success: true,
        user,
    }))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(me): AuthUser,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> Result<Json<UpdateProfileResponse>, ServerError> {
    let request = json_body(payload)?;
    let (user, message) = state.service.update_profile(me, request).await?;
    Ok(Json(UpdateProfileResponse {
        success: true,
        message,
        user,
    }))
}

async fn media_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.media.get(&id).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&id))], data))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use duet_shared::UserProfile;
    use duet_store::Database;

    use crate::events::EventHub;

    struct Harness {
        router: Router,
        ada: UserId,
        bob: UserId,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::default();
        let media = Arc::new(
            DiskImageStore::new(
                dir.path().to_path_buf(),
                config.max_image_size,
                config.public_base_url.clone(),
            )
            .await
            .unwrap(),
        );

        let db = Database::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["Ada", "Bob"] {
            let user = UserProfile {
                id: UserId::new(),
                full_name: name.into(),
                profile_pic: None,
                bio: String::new(),
                last_seen: None,
            };
            db.upsert_user(&user).unwrap();
            ids.push(user.id);
        }

        let service = MessageService::new(
            Arc::new(Mutex::new(db)),
            EventHub::default(),
            media.clone(),
            config.image_upload_timeout,
        );
        let router = build_router(AppState {
            service,
            media,
            config: Arc::new(config),
        });
        Harness {
            router,
            ada: ids[0],
            bob: ids[1],
            _dir: dir,
        }
    }

    async fn call(
        router: &Router,
        method: Method,
        uri: &str,
        user: Option<UserId>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_status() {
        let h = harness().await;
        let (status, body) = call(&h.router, Method::GET, "/api/status", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["onlineUsers"], 0);
    }

    #[tokio::test]
    async fn test_missing_identity_is_401() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::GET,
            "/api/messages/sidebar-summary",
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_invalid_id_is_400() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::GET,
            "/api/messages/conversation/not-a-uuid",
            Some(h.ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid id");
    }

    #[tokio::test]
    async fn test_send_fetch_and_delete() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::POST,
            &format!("/api/messages/send/{}", h.bob),
            Some(h.ada),
            Some(serde_json::json!({ "text": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newMessage"]["text"], "hello");
        assert_eq!(body["newMessage"]["sender"]["fullName"], "Ada");
        let message_id = body["newMessage"]["id"].as_str().unwrap().to_string();

        let (_, sidebar) = call(
            &h.router,
            Method::GET,
            "/api/messages/sidebar-summary",
            Some(h.bob),
            None,
        )
        .await;
        let ada = h.ada.to_string();
        assert_eq!(sidebar["lastMessages"][&ada]["text"], "hello");
        assert_eq!(sidebar["unseenMessages"][&ada], 1);

        let (status, conversation) = call(
            &h.router,
            Method::GET,
            &format!("/api/messages/conversation/{}", h.ada),
            Some(h.bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(conversation["messages"][0]["seen"], true);

        let (status, _) = call(
            &h.router,
            Method::DELETE,
            &format!("/api/messages/delete/{message_id}"),
            Some(h.bob),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(
            &h.router,
            Method::DELETE,
            &format!("/api/messages/delete/{message_id}"),
            Some(h.ada),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_empty_send_is_400() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::POST,
            &format!("/api/messages/send/{}", h.bob),
            Some(h.ada),
            Some(serde_json::json!({ "text": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Cannot send empty message");
    }

    #[tokio::test]
    async fn test_image_upload_is_served() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::POST,
            &format!("/api/messages/send/{}", h.bob),
            Some(h.ada),
            Some(serde_json::json!({ "image": "data:image/png;base64,aGVsbG8=" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let url = body["newMessage"]["image"].as_str().unwrap();
        let path = url.trim_start_matches("http://localhost:5000");

        let response = h
            .router
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_update_profile() {
        let h = harness().await;
        let (status, body) = call(
            &h.router,
            Method::PUT,
            "/api/auth/update-profile",
            Some(h.ada),
            Some(serde_json::json!({ "fullName": "Ada Lovelace", "bio": "engines" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["fullName"], "Ada Lovelace");

        let (_, users) = call(
            &h.router,
            Method::GET,
            "/api/messages/users",
            Some(h.bob),
            None,
        )
        .await;
        assert_eq!(users["users"][0]["fullName"], "Ada Lovelace");
    }
}
