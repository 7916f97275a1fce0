//! The event channel: one WebSocket per connected user, server-to-client only.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::time::interval;
use tracing::{debug, warn};

use duet_shared::constants::SOCKET_HEARTBEAT_SECS;
use duet_shared::protocol::ConnectParams;
use duet_shared::UserId;

use crate::api::AppState;
use crate::presence::ConnectionHandle;

pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Response {
    let user = params.user_id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let (handle, mut events) = ConnectionHandle::channel(state.config.socket_buffer);
    let conn = handle.id();
    let hub = state.service.hub().clone();
    hub.connect(user, handle).await;

    let (mut sender, mut incoming) = socket.split();
    let mut heartbeat = interval(Duration::from_secs(SOCKET_HEARTBEAT_SECS));

    loop {
        tokio::select! {
            event = events.recv() => {
                // None: every handle was dropped, i.e. this connection was replaced.
                let Some(event) = event else { break };
                let frame = match event.to_json() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(user = %user, event = event.name(), error = %e, "failed to encode event");
                        continue;
                    }
                };
                if sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            msg = incoming.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // The channel is push-only; anything else is ignored.
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(user = %user, conn, "event channel closed");
    if hub.disconnect(user, conn).await {
        state.service.touch_last_seen(user);
    }
}
