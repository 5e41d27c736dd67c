use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_types::events::ServerEvent;

/// A specific live connection failed to receive an event. Logged and
/// isolated, never escalated to the caller of the mutating operation.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connection {0} is not registered")]
    ConnectionGone(Uuid),
    #[error("connection {0} closed its outbound channel")]
    ChannelClosed(Uuid),
}

struct ConnectionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<Uuid, ConnectionEntry>,
    by_user: HashMap<Uuid, HashSet<Uuid>>,
}

/// Live mapping from users to their active connections. A user may hold many
/// simultaneous connections (multi-device); a connection maps to exactly one
/// user. This table is the only in-memory shared state in the process —
/// single-node by design.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryState::default())),
        }
    }

    /// Register a live connection for an authenticated user. Returns the
    /// connection id and the receiving end of its outbound event queue.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.inner.write().await;
        state
            .connections
            .insert(conn_id, ConnectionEntry { user_id, tx });
        state.by_user.entry(user_id).or_default().insert(conn_id);

        (conn_id, rx)
    }

    /// Remove a connection. Idempotent: deregistering an unknown or
    /// already-removed id is a no-op so the disconnect path never fails.
    pub async fn deregister(&self, conn_id: Uuid) {
        let mut state = self.inner.write().await;
        if let Some(entry) = state.connections.remove(&conn_id) {
            if let Some(conns) = state.by_user.get_mut(&entry.user_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    state.by_user.remove(&entry.user_id);
                }
            }
        }
    }

    /// All live connection ids owned by a user, possibly empty.
    pub async fn resolve_connections(&self, user_id: Uuid) -> Vec<Uuid> {
        let state = self.inner.read().await;
        state
            .by_user
            .get(&user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Administrative reset, e.g. process restart recovery.
    pub async fn clear(&self) {
        let mut state = self.inner.write().await;
        state.connections.clear();
        state.by_user.clear();
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Emit a single event to a single connection.
    pub async fn send_to_connection(
        &self,
        conn_id: Uuid,
        event: ServerEvent,
    ) -> Result<(), DeliveryError> {
        let state = self.inner.read().await;
        let entry = state
            .connections
            .get(&conn_id)
            .ok_or(DeliveryError::ConnectionGone(conn_id))?;
        entry
            .tx
            .send(event)
            .map_err(|_| DeliveryError::ChannelClosed(conn_id))
    }

    /// Fan an event out to every live connection of the given users.
    ///
    /// Connections are deduplicated first, so a user appearing twice in the
    /// target set still receives exactly one copy per connection. Emissions
    /// run concurrently and are awaited independently; a failed delivery is
    /// logged and never aborts or delays the others.
    pub async fn notify_users(&self, user_ids: &[Uuid], event: &ServerEvent) {
        let mut targets = Vec::new();
        {
            let state = self.inner.read().await;
            let mut seen = HashSet::new();
            for user_id in user_ids {
                if let Some(conns) = state.by_user.get(user_id) {
                    for conn_id in conns {
                        if seen.insert(*conn_id) {
                            targets.push(*conn_id);
                        }
                    }
                }
            }
        }

        let deliveries = targets.into_iter().map(|conn_id| {
            let event = event.clone();
            async move { (conn_id, self.send_to_connection(conn_id, event).await) }
        });

        for (conn_id, outcome) in join_all(deliveries).await {
            match outcome {
                Ok(()) => debug!("Notification sent to connection {}", conn_id),
                Err(err) => warn!("Failed to notify connection {}: {}", conn_id, err),
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sent_event() -> ServerEvent {
        ServerEvent::RoomDeleted {
            message: "gone".into(),
        }
    }

    #[tokio::test]
    async fn register_and_resolve() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (conn_id, _rx) = registry.register(user).await;

        assert_eq!(registry.resolve_connections(user).await, vec![conn_id]);
        assert!(registry.resolve_connections(Uuid::new_v4()).await.is_empty());
    }

    #[tokio::test]
    async fn deregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (conn_id, _rx) = registry.register(user).await;

        registry.deregister(conn_id).await;
        registry.deregister(conn_id).await;
        registry.deregister(Uuid::new_v4()).await;

        assert!(registry.resolve_connections(user).await.is_empty());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn multi_device_user_gets_one_copy_per_connection() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (_, mut rx_a) = registry.register(user).await;
        let (_, mut rx_b) = registry.register(user).await;

        // User listed twice: dedup still yields one event per connection
        registry.notify_users(&[user, user], &sent_event()).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_delivery_does_not_block_others() {
        let registry = SessionRegistry::new();
        let dead_user = Uuid::new_v4();
        let live_user = Uuid::new_v4();
        let (_, rx_dead) = registry.register(dead_user).await;
        let (_, mut rx_live) = registry.register(live_user).await;

        // Client went away without deregistering
        drop(rx_dead);

        registry
            .notify_users(&[dead_user, live_user], &sent_event())
            .await;
        assert!(rx_live.try_recv().is_ok());
    }

    #[tokio::test]
    async fn send_to_unknown_connection_reports_gone() {
        let registry = SessionRegistry::new();
        let err = registry
            .send_to_connection(Uuid::new_v4(), sent_event())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::ConnectionGone(_)));
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let registry = SessionRegistry::new();
        let user = Uuid::new_v4();
        let (_, _rx) = registry.register(user).await;
        let (_, _rx2) = registry.register(Uuid::new_v4()).await;

        registry.clear().await;
        assert_eq!(registry.connection_count().await, 0);
        assert!(registry.resolve_connections(user).await.is_empty());
    }
}
