//! Event channel client.
//!
//! Each call to [`EventSocket::connect`] starts a new generation: the reader
//! task of the previous one is aborted first, and every update is tagged with
//! the generation that produced it so late updates from a superseded
//! connection can be recognized and dropped.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use duet_shared::protocol::ServerEvent;

const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Debug)]
pub enum SocketUpdateKind {
    /// The channel is (again) live. Pushes may have been missed before this.
    Connected,
    Event(ServerEvent),
    /// The channel dropped; the reader retries on its own.
    Disconnected(String),
}

#[derive(Debug)]
pub struct SocketUpdate {
    pub generation: u64,
    pub kind: SocketUpdateKind,
}

#[derive(Debug, Default)]
pub struct EventSocket {
    generation: u64,
    connected: bool,
    task: Option<JoinHandle<()>>,
}

impl EventSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Record a connection state change reported by the current generation.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Replace any running connection with a new one to `url`.
    pub fn connect(&mut self, url: String, updates: mpsc::Sender<SocketUpdate>) -> u64 {
        self.disconnect();
        self.generation += 1;
        let generation = self.generation;
        self.task = Some(tokio::spawn(reader_loop(url, generation, updates)));
        generation
    }

    /// Stop the reader task, if any.
    pub fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(generation = self.generation, "Event channel reader stopped");
        }
        self.connected = false;
    }
}

impl Drop for EventSocket {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt.min(5)).min(MAX_BACKOFF_SECS))
}

/// Decode one text frame. Unknown events are skipped.
fn decode_frame(text: &str) -> Option<ServerEvent> {
    match ServerEvent::from_json(text) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "Ignoring undecodable event frame");
            None
        }
    }
}

async fn reader_loop(url: String, generation: u64, updates: mpsc::Sender<SocketUpdate>) {
    let send = |kind| {
        let updates = updates.clone();
        async move { updates.send(SocketUpdate { generation, kind }).await.is_ok() }
    };

    let mut attempt: u32 = 0;
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, response)) => {
                info!(generation, status = %response.status(), "Event channel connected");
                attempt = 0;
                if !send(SocketUpdateKind::Connected).await {
                    return;
                }

                let (mut write, mut read) = ws_stream.split();
                let reason = loop {
                    match read.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(event) = decode_frame(text.as_str()) {
                                if !send(SocketUpdateKind::Event(event)).await {
                                    return;
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break format!("pong failed: {e}");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break "closed by server".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            error!(generation, error = %e, "Event channel error");
                            break e.to_string();
                        }
                    }
                };

                if !send(SocketUpdateKind::Disconnected(reason)).await {
                    return;
                }
            }
            Err(e) => {
                warn!(generation, error = %e, "Event channel connection failed");
            }
        }

        let delay = backoff_delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(generation, delay_secs = delay.as_secs(), "Reconnecting event channel");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_shared::UserId;

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(0), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(8));
        assert_eq!(backoff_delay(40), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[test]
    fn test_frames_decode_or_are_skipped() {
        let user = UserId::new();
        let frame = format!(r#"{{"event":"getOnlineUsers","data":["{user}"]}}"#);
        assert_eq!(decode_frame(&frame), Some(ServerEvent::OnlineUsers(vec![user])));
        assert_eq!(decode_frame(r#"{"event":"somethingNew","data":1}"#), None);
    }

    #[tokio::test]
    async fn test_reconnect_bumps_generation_and_aborts_reader() {
        let (tx, _rx) = mpsc::channel(8);
        let mut socket = EventSocket::new();

        let first = socket.connect("ws://127.0.0.1:9/socket".into(), tx.clone());
        let old_task = socket.task.as_ref().map(|t| t.abort_handle());
        let second = socket.connect("ws://127.0.0.1:9/socket".into(), tx);

        assert_eq!(second, first + 1);
        assert!(socket.is_current(second));
        assert!(!socket.is_current(first));

        let old_task = old_task.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !old_task.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }
}
