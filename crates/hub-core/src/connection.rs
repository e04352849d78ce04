//! Registry of live leaf connections
//!
//! The transport owns the sockets; the hub only ever sees a
//! [`ConnectionSink`] it can hand messages to. Sends never wait: a leaf
//! without a session, or with a full queue, simply misses the message.

use dashmap::DashMap;
use leaf_protocol::{HubId, OutboundMessage};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Identifies one session of a leaf, so a stale session cannot unregister
/// the one that replaced it
pub type ConnectionId = Uuid;

/// Fire-and-forget delivery to leaves
pub trait ConnectionSink: Send + Sync {
    /// Queue `message` for the leaf. Returns `false` if it was dropped.
    fn send(&self, hub_id: HubId, leaf_uuid: &str, message: OutboundMessage) -> bool;
}

struct LeafConnection {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
}

/// Outbound queues keyed by hub and leaf uuid
pub struct LeafConnections {
    connections: DashMap<(HubId, String), LeafConnection>,
    buffer: usize,
}

impl LeafConnections {
    /// Create a registry whose per-leaf queues hold `buffer` messages
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Open a queue for a leaf session, replacing any previous session
    pub fn register(
        &self,
        hub_id: HubId,
        leaf_uuid: &str,
    ) -> (ConnectionId, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        let previous = self
            .connections
            .insert((hub_id, leaf_uuid.to_string()), LeafConnection { id, tx });

        if previous.is_some() {
            tracing::info!("Leaf {} on hub {} replaced its previous session", leaf_uuid, hub_id);
        }
        (id, rx)
    }

    /// Close a session. Does nothing if `id` is no longer the current one.
    pub fn unregister(&self, hub_id: HubId, leaf_uuid: &str, id: ConnectionId) -> bool {
        self.connections
            .remove_if(&(hub_id, leaf_uuid.to_string()), |_, conn| conn.id == id)
            .is_some()
    }
}

impl ConnectionSink for LeafConnections {
    fn send(&self, hub_id: HubId, leaf_uuid: &str, message: OutboundMessage) -> bool {
        let Some(conn) = self.connections.get(&(hub_id, leaf_uuid.to_string())) else {
            tracing::trace!("No session for leaf {} on hub {}, dropping message", leaf_uuid, hub_id);
            return false;
        };

        match conn.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full for leaf {} on hub {}", leaf_uuid, hub_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Session for leaf {} on hub {} is closing", leaf_uuid, hub_id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> OutboundMessage {
        OutboundMessage::ListDevices {
            uuid: "leaf-a".into(),
        }
    }

    #[tokio::test]
    async fn test_send_to_registered_leaf() {
        let connections = LeafConnections::new(4);
        let (_id, mut rx) = connections.register(HubId(1), "leaf-a");

        assert!(connections.send(HubId(1), "leaf-a", ping()));
        assert_eq!(rx.recv().await, Some(ping()));
    }

    #[test]
    fn test_send_without_session_is_dropped() {
        let connections = LeafConnections::new(4);
        assert!(!connections.send(HubId(1), "leaf-a", ping()));
    }

    #[test]
    fn test_sessions_are_scoped_per_hub() {
        let connections = LeafConnections::new(4);
        let (_id, mut rx) = connections.register(HubId(1), "leaf-a");

        assert!(!connections.send(HubId(2), "leaf-a", ping()));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops() {
        let connections = LeafConnections::new(1);
        let (_id, _rx) = connections.register(HubId(1), "leaf-a");

        assert!(connections.send(HubId(1), "leaf-a", ping()));
        assert!(!connections.send(HubId(1), "leaf-a", ping()));
    }

    #[test]
    fn test_stale_session_cannot_unregister() {
        let connections = LeafConnections::new(4);
        let (old_id, _old_rx) = connections.register(HubId(1), "leaf-a");
        let (new_id, _new_rx) = connections.register(HubId(1), "leaf-a");

        assert!(!connections.unregister(HubId(1), "leaf-a", old_id));
        assert!(connections.send(HubId(1), "leaf-a", ping()));
        assert!(connections.unregister(HubId(1), "leaf-a", new_id));
        assert!(!connections.send(HubId(1), "leaf-a", ping()));
    }
}
