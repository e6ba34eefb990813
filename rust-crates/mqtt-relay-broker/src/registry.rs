use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::subscription::{SubscriptionState, SubscriptionUpdate};
use crate::transport::Transport;

static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an accepted stream connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transport handle plus the subscription it owns
pub struct Connection {
    transport: Arc<dyn Transport>,
    subscription: SubscriptionState,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            subscription: SubscriptionState::Unsubscribed,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn subscription(&self) -> &SubscriptionState {
        &self.subscription
    }
}

/// Live connections keyed by identity
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection with no subscription
    pub fn insert(&mut self, transport: Arc<dyn Transport>) -> ConnectionId {
        let id = ConnectionId::next();
        self.connections.insert(id, Connection::new(transport));
        id
    }

    /// Drop a connection and its subscription
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.connections.remove(&id).is_some()
    }

    /// Replace a connection's subscription; `false` if the connection is gone
    pub fn apply(&mut self, id: ConnectionId, update: SubscriptionUpdate) -> bool {
        match self.connections.get_mut(&id) {
            Some(conn) => {
                let current = std::mem::take(&mut conn.subscription);
                conn.subscription = current.apply(update);
                true
            }
            None => false,
        }
    }

    /// Drop every connection; returns how many there were
    pub fn clear(&mut self) -> usize {
        let count = self.connections.len();
        self.connections.clear();
        count
    }

    pub fn subscription(&self, id: ConnectionId) -> Option<&SubscriptionState> {
        self.connections.get(&id).map(Connection::subscription)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &Connection)> {
        self.connections.iter().map(|(id, conn)| (*id, conn))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
