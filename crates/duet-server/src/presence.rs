use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use duet_shared::protocol::ServerEvent;
use duet_shared::UserId;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Outgoing half of one live event connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: u64,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Open a handle with a bounded queue of `buffer` events.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue an event without waiting. Returns `false` when the connection is
    /// gone or too slow to keep up; the event is dropped in both cases.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }
}

/// Map of online users to their single live connection.
///
/// A user who connects again replaces the previous handle. Once the replaced
/// handle is dropped its queue closes and the old socket loop exits; that
/// connection's disconnect is ignored because the connection ids no longer
/// match.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    online: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `user` online. Returns the handle this one replaced, if any.
    pub async fn register(
        &self,
        user: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut online = self.online.write().await;
        let conn = handle.id;
        let previous = online.insert(user, handle);

        info!(
            user = %user,
            conn,
            replaced = previous.is_some(),
            online = online.len(),
            "User connected"
        );

        previous
    }

    /// Mark `user` offline, but only if `conn` is still their current
    /// connection. Returns whether an entry was removed.
    pub async fn unregister(&self, user: UserId, conn: u64) -> bool {
        let mut online = self.online.write().await;
        match online.get(&user) {
            Some(handle) if handle.id == conn => {
                online.remove(&user);
                info!(user = %user, conn, online = online.len(), "User disconnected");
                true
            }
            Some(_) => {
                debug!(user = %user, conn, "Ignoring disconnect of a replaced connection");
                false
            }
            None => false,
        }
    }

    pub async fn lookup(&self, user: &UserId) -> Option<ConnectionHandle> {
        self.online.read().await.get(user).cloned()
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.online.read().await.contains_key(user)
    }

    /// Ids of every online user, sorted.
    pub async fn snapshot(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.online.read().await.keys().copied().collect();
        users.sort();
        users
    }

    /// Every live handle, for broadcasts.
    pub async fn handles(&self) -> Vec<(UserId, ConnectionHandle)> {
        self.online
            .read()
            .await
            .iter()
            .map(|(user, handle)| (*user, handle.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_shared::protocol::MessageDeleted;
    use duet_shared::MessageId;

    fn event() -> ServerEvent {
        ServerEvent::MessageDeleted(MessageDeleted {
            message_id: MessageId::new(),
        })
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (handle, _rx) = ConnectionHandle::channel(4);
        let conn = handle.id();

        assert!(registry.register(user, handle).await.is_none());
        assert!(registry.is_online(&user).await);
        assert_eq!(registry.snapshot().await, vec![user]);

        assert!(registry.unregister(user, conn).await);
        assert!(!registry.is_online(&user).await);
        assert!(!registry.unregister(user, conn).await);
    }

    #[tokio::test]
    async fn test_last_connection_wins() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (first, mut first_rx) = ConnectionHandle::channel(4);
        let (second, mut second_rx) = ConnectionHandle::channel(4);
        let (first_id, second_id) = (first.id(), second.id());

        registry.register(user, first).await;
        let replaced = registry.register(user, second).await.unwrap();
        assert_eq!(replaced.id(), first_id);

        // The stale connection closing must not take the user offline.
        assert!(!registry.unregister(user, first_id).await);
        assert!(registry.is_online(&user).await);

        let current = registry.lookup(&user).await.unwrap();
        assert_eq!(current.id(), second_id);
        assert!(current.send(event()));
        assert!(second_rx.try_recv().is_ok());
        assert!(first_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted() {
        let registry = PresenceRegistry::new();
        let mut users: Vec<UserId> = (0..5).map(|_| UserId::new()).collect();
        let mut receivers = Vec::new();
        for user in &users {
            let (handle, rx) = ConnectionHandle::channel(1);
            receivers.push(rx);
            registry.register(*user, handle).await;
        }
        users.sort();
        assert_eq!(registry.snapshot().await, users);
        assert_eq!(registry.handles().await.len(), 5);
    }

    #[test]
    fn test_full_queue_drops_events() {
        let (handle, _rx) = ConnectionHandle::channel(1);
        assert!(handle.send(event()));
        assert!(!handle.send(event()));
    }

    #[test]
    fn test_closed_connection_drops_events() {
        let (handle, rx) = ConnectionHandle::channel(1);
        drop(rx);
        assert!(!handle.send(event()));
    }
}
