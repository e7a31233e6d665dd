//! Live connection registry for message push.
//!
//! Maps connections to the receivers they serve. A broadcast binding routes
//! every message for a receiver to one connection; a subscription binding
//! routes messages between a (receiver, sender) pair. Rebinding a key moves it
//! to the newer connection, and a disconnect drops every binding that still
//! points at the closed connection.

use dashmap::DashMap;
use uuid::Uuid;

/// Identifier of a live connection.
pub type ConnectionId = Uuid;

/// Concurrency-safe registry of live connections and their bindings.
///
/// `H` is the transport handle used to push to a connection (for example a
/// channel sender).
#[derive(Debug)]
pub struct ConnectionRegistry<H> {
    connections: DashMap<ConnectionId, H>,
    broadcasts: DashMap<i64, ConnectionId>,
    subscriptions: DashMap<(i64, i64), ConnectionId>,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self {
            connections: DashMap::new(),
            broadcasts: DashMap::new(),
            subscriptions: DashMap::new(),
        }
    }
}

impl<H: Clone> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and returns its id.
    pub fn connect(&self, handle: H) -> ConnectionId {
        let id = Uuid::new_v4();
        self.connections.insert(id, handle);
        tracing::debug!(connection_id = %id, "connection registered");
        id
    }

    /// Removes a connection and every binding that points at it.
    pub fn disconnect(&self, id: ConnectionId) -> Option<H> {
        let (_, handle) = self.connections.remove(&id)?;
        self.broadcasts.retain(|_, bound| *bound != id);
        self.subscriptions.retain(|_, bound| *bound != id);
        tracing::debug!(connection_id = %id, "connection removed");
        Some(handle)
    }

    /// Routes broadcasts for `receiver_id` to `connection`.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn bind_broadcast(&self, receiver_id: i64, connection: ConnectionId) -> bool {
        if !self.connections.contains_key(&connection) {
            return false;
        }
        self.broadcasts.insert(receiver_id, connection);
        true
    }

    /// Drops the broadcast binding of `receiver_id` if it still points at
    /// `connection`.
    pub fn unbind_broadcast(&self, receiver_id: i64, connection: ConnectionId) -> bool {
        self.broadcasts
            .remove_if(&receiver_id, |_, bound| *bound == connection)
            .is_some()
    }

    /// Routes messages from `sender_id` to `receiver_id` over `connection`.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn bind_subscription(
        &self,
        receiver_id: i64,
        sender_id: i64,
        connection: ConnectionId,
    ) -> bool {
        if !self.connections.contains_key(&connection) {
            return false;
        }
        self.subscriptions.insert((receiver_id, sender_id), connection);
        true
    }

    /// Drops a subscription binding if it still points at `connection`.
    pub fn unbind_subscription(
        &self,
        receiver_id: i64,
        sender_id: i64,
        connection: ConnectionId,
    ) -> bool {
        self.subscriptions
            .remove_if(&(receiver_id, sender_id), |_, bound| *bound == connection)
            .is_some()
    }

    /// Handle serving broadcasts for a receiver.
    pub fn broadcast_target(&self, receiver_id: i64) -> Option<H> {
        let id = *self.broadcasts.get(&receiver_id)?;
        self.connection(id)
    }

    /// Handle serving a (receiver, sender) subscription.
    pub fn subscription_target(&self, receiver_id: i64, sender_id: i64) -> Option<H> {
        let id = *self.subscriptions.get(&(receiver_id, sender_id))?;
        self.connection(id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<H> {
        self.connections.get(&id).map(|h| h.value().clone())
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
