//! Event fan-out on top of the presence registry.

use tracing::debug;

use duet_shared::protocol::ServerEvent;
use duet_shared::UserId;

use crate::presence::{ConnectionHandle, PresenceRegistry};

#[derive(Clone, Default)]
pub struct EventHub {
    presence: PresenceRegistry,
}

impl EventHub {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self { presence }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Deliver `event` to `user` if they are online. Offline users simply
    /// miss it; they resynchronize through the REST endpoints.
    pub async fn emit_to(&self, user: UserId, event: ServerEvent) -> bool {
        let Some(handle) = self.presence.lookup(&user).await else {
            debug!(user = %user, event = event.name(), "Recipient offline, event skipped");
            return false;
        };
        let delivered = handle.send(event.clone());
        if !delivered {
            debug!(
                user = %user,
                event = event.name(),
                "Dropping event for slow connection"
            );
        }
        delivered
    }

    /// Deliver `event` to every online user.
    pub async fn broadcast(&self, event: ServerEvent) {
        for (user, handle) in self.presence.handles().await {
            if !handle.send(event.clone()) {
                debug!(
                    user = %user,
                    event = event.name(),
                    "Dropping event for slow connection"
                );
            }
        }
    }

    /// Send the current online set to everyone.
    pub async fn broadcast_presence(&self) {
        let online = self.presence.snapshot().await;
        self.broadcast(ServerEvent::OnlineUsers(online)).await;
    }

    /// Register a connection and announce the new online set.
    pub async fn connect(&self, user: UserId, handle: ConnectionHandle) {
        self.presence.register(user, handle).await;
        self.broadcast_presence().await;
    }

    /// Drop a connection and announce the new online set. Returns `false`
    /// (and stays silent) when the connection had already been replaced.
    pub async fn disconnect(&self, user: UserId, conn: u64) -> bool {
        let removed = self.presence.unregister(user, conn).await;
        if removed {
            self.broadcast_presence().await;
        }
        removed
    }
}
