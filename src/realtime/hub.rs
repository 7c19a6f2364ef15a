//! In-process topic broker.
//!
//! Each live connection owns a bounded outbound queue. Publishing walks the
//! topic's members and `try_send`s into their queues: a full or closed queue
//! loses that one delivery and the publisher moves on. Nothing is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::messages::{ServerMessage, Topic};

/// Identifies one registered connection.
pub type ConnectionId = u64;

#[derive(Default)]
struct Registry {
    outbound: HashMap<ConnectionId, mpsc::Sender<ServerMessage>>,
    members: HashMap<Topic, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<Topic>>,
}

/// Topic-based publish/subscribe hub shared by every connection task.
#[derive(Clone, Default)]
pub struct EventHub {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventHub {
    /// Creates a new, empty `EventHub`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns its id and the receiving end of
    /// its outbound queue.
    pub fn register(&self, capacity: usize) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.outbound.insert(id, tx);
        registry.joined.insert(id, HashSet::new());

        (id, rx)
    }

    /// Adds `connection` to `topic`. Repeating it is a no-op. Returns
    /// `false` if the connection is not registered.
    pub fn subscribe(&self, connection: ConnectionId, topic: Topic) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        let Some(joined) = registry.joined.get_mut(&connection) else {
            return false;
        };
        joined.insert(topic);
        registry.members.entry(topic).or_default().insert(connection);

        tracing::debug!("📡 Connection {} joined {}", connection, topic);
        true
    }

    /// Removes `connection` from `topic`. Removing a missing membership is
    /// a no-op.
    pub fn unsubscribe(&self, connection: ConnectionId, topic: Topic) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(joined) = registry.joined.get_mut(&connection) {
            joined.remove(&topic);
        }
        if let Some(members) = registry.members.get_mut(&topic) {
            members.remove(&connection);
            if members.is_empty() {
                registry.members.remove(&topic);
            }
        }
    }

    /// Drops a connection and every membership it holds. Returns the number
    /// of topics released.
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);

        registry.outbound.remove(&connection);
        let topics = registry.joined.remove(&connection).unwrap_or_default();

        for topic in &topics {
            if let Some(members) = registry.members.get_mut(topic) {
                members.remove(&connection);
                if members.is_empty() {
                    registry.members.remove(topic);
                }
            }
        }

        tracing::debug!("📴 Connection {} released {} topics", connection, topics.len());
        topics.len()
    }

    /// Delivers `message` to every current member of `topic` without
    /// waiting on any of them. Returns how many queues accepted it.
    pub fn publish(&self, topic: Topic, message: ServerMessage) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);

        let Some(members) = registry.members.get(&topic) else {
            return 0;
        };

        let mut delivered = 0;
        for connection in members {
            let Some(tx) = registry.outbound.get(connection) else {
                continue;
            };

            match tx.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "⚠️  Dropped {} for connection {} on {}: queue full",
                        message.kind(),
                        connection,
                        topic
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        "Dropped {} for connection {} on {}: receiver gone",
                        message.kind(),
                        connection,
                        topic
                    );
                }
            }
        }

        delivered
    }

    /// Number of connections currently joined to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.members.get(&topic).map_or(0, HashSet::len)
    }

    /// Topics `connection` is currently joined to.
    pub fn topics_of(&self, connection: ConnectionId) -> HashSet<Topic> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.joined.get(&connection).cloned().unwrap_or_default()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.outbound.len()
    }
}

/// Scoped hub registration. Dropping it releases every membership, so a
/// connection task that ends for any reason, panics included, leaves nothing
/// behind in the hub.
pub struct HubMembership {
    hub: EventHub,
    id: ConnectionId,
}

impl HubMembership {
    /// Registers a new connection with `hub`.
    pub fn join(hub: &EventHub, capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (id, rx) = hub.register(capacity);
        (
            Self {
                hub: hub.clone(),
                id,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for HubMembership {
    fn drop(&mut self) {
        self.hub.disconnect(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn pong() -> ServerMessage {
        ServerMessage::Pong { timestamp: Utc::now() }
    }

    #[tokio::test]
    async fn publish_reaches_only_topic_members() {
        let hub = EventHub::new();
        let (a, mut rx_a) = hub.register(8);
        let (b, mut rx_b) = hub.register(8);

        hub.subscribe(a, Topic::Session(42));
        hub.subscribe(b, Topic::Session(43));

        assert_eq!(hub.publish(Topic::Session(42), pong()), 1);
        assert_eq!(rx_a.recv().await.unwrap().kind(), "pong");
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn subscribe_and_unsubscribe_are_idempotent() {
        let hub = EventHub::new();
        let (id, _rx) = hub.register(8);

        assert!(hub.subscribe(id, Topic::Session(1)));
        assert!(hub.subscribe(id, Topic::Session(1)));
        assert_eq!(hub.subscriber_count(Topic::Session(1)), 1);

        hub.unsubscribe(id, Topic::Session(1));
        hub.unsubscribe(id, Topic::Session(1));
        assert_eq!(hub.subscriber_count(Topic::Session(1)), 0);
    }

    #[test]
    fn unknown_connection_cannot_subscribe() {
        let hub = EventHub::new();
        assert!(!hub.subscribe(99, Topic::User(1)));
        assert_eq!(hub.subscriber_count(Topic::User(1)), 0);
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let hub = EventHub::new();
        let (id, _rx) = hub.register(1);
        hub.subscribe(id, Topic::Role(crate::models::user::Role::Student));

        let topic = Topic::Role(crate::models::user::Role::Student);
        assert_eq!(hub.publish(topic, pong()), 1);
        assert_eq!(hub.publish(topic, pong()), 0);
    }

    #[test]
    fn closed_receiver_is_skipped() {
        let hub = EventHub::new();
        let (id, rx) = hub.register(4);
        hub.subscribe(id, Topic::User(5));
        drop(rx);

        assert_eq!(hub.publish(Topic::User(5), pong()), 0);
    }

    #[test]
    fn dropping_membership_releases_every_topic() {
        let hub = EventHub::new();
        let (membership, _rx) = HubMembership::join(&hub, 4);
        let id = membership.id();

        hub.subscribe(id, Topic::User(5));
        hub.subscribe(id, Topic::Session(42));
        assert_eq!(hub.topics_of(id).len(), 2);

        drop(membership);

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.subscriber_count(Topic::User(5)), 0);
        assert_eq!(hub.subscriber_count(Topic::Session(42)), 0);
    }
}
