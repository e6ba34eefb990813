use std::sync::Arc;
use tokio::sync::RwLock;

use crate::dispatch::DispatchTable;
use crate::error::ProtocolError;
use crate::matcher;
use crate::point::Point;
use crate::protocol;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::subscription::SubscriptionState;
use crate::transport::Transport;

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Points produced by the parser
    pub points: usize,
    /// Connections that were sent a message
    pub deliveries: usize,
    /// Connections whose transport refused the message
    pub failures: usize,
}

/// Relays parsed upstream payloads to every connection whose subscription matches
#[derive(Clone)]
pub struct FanoutDispatcher {
    table: Arc<DispatchTable>,
    registry: Arc<RwLock<ConnectionRegistry>>,
}

impl FanoutDispatcher {
    pub fn new(table: DispatchTable) -> Self {
        Self {
            table: Arc::new(table),
            registry: Arc::new(RwLock::new(ConnectionRegistry::new())),
        }
    }

    pub fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Track a newly accepted connection
    pub async fn register(&self, transport: Arc<dyn Transport>) -> ConnectionId {
        let mut registry = self.registry.write().await;
        let id = registry.insert(transport);
        tracing::info!("Connection {} opened. Total: {}", id, registry.len());
        id
    }

    /// Forget a closed connection
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut registry = self.registry.write().await;
        let removed = registry.remove(id);
        if removed {
            tracing::info!("Connection {} closed. Remaining: {}", id, registry.len());
        }
        removed
    }

    /// Forget every connection, dropping their transports
    ///
    /// Writers draining a dropped channel see it end and close their socket.
    pub async fn clear(&self) -> usize {
        let mut registry = self.registry.write().await;
        if registry.is_empty() {
            return 0;
        }
        let closed = registry.clear();
        tracing::info!("Closed {} connections", closed);
        closed
    }

    /// Handle one inbound message from a connection
    ///
    /// Rejected messages are logged and leave the current subscription as is.
    pub async fn handle_message(&self, id: ConnectionId, text: &str) -> Result<(), ProtocolError> {
        let update = match protocol::decode_subscription(text) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("Connection {}: {}", id, e);
                return Err(e);
            }
        };

        if self.registry.write().await.apply(id, update) {
            tracing::debug!("Connection {} subscription updated", id);
            Ok(())
        } else {
            Err(ProtocolError::UnknownConnection(id.as_u64()))
        }
    }

    pub async fn subscription(&self, id: ConnectionId) -> Option<SubscriptionState> {
        self.registry.read().await.subscription(id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Connections currently holding at least one clause
    pub async fn subscriber_count(&self) -> usize {
        self.registry
            .read()
            .await
            .iter()
            .filter(|(_, conn)| !conn.subscription().clauses().is_empty())
            .count()
    }

    /// Parse an upstream payload and deliver matches to each connection
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchReport {
        let Some(points) = self.table.dispatch(topic, payload) else {
            return DispatchReport::default();
        };

        let (report, dead) = self.fan_out(&points).await;

        if !dead.is_empty() {
            let mut registry = self.registry.write().await;
            for id in dead {
                registry.remove(id);
            }
            tracing::info!("Removed dead connections. Remaining: {}", registry.len());
        }

        report
    }

    async fn fan_out(&self, points: &[Point]) -> (DispatchReport, Vec<ConnectionId>) {
        let registry = self.registry.read().await;
        let mut report = DispatchReport {
            points: points.len(),
            ..DispatchReport::default()
        };
        let mut dead = Vec::new();

        for (id, conn) in registry.iter() {
            let matched: Vec<&Point> = points
                .iter()
                .filter(|point| matcher::matches(point, conn.subscription()))
                .collect();
            if matched.is_empty() {
                continue;
            }

            let message = match protocol::encode_points(&matched) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!("Failed to serialize points for {}: {}", id, e);
                    continue;
                }
            };

            match conn.transport().send(message) {
                Ok(()) => report.deliveries += 1,
                Err(e) => {
                    tracing::warn!("Failed to send to connection {}: {}", id, e);
                    report.failures += 1;
                    dead.push(id);
                }
            }
        }

        (report, dead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn connect(dispatcher: &FanoutDispatcher) -> (ConnectionId, UnboundedReceiver<String>) {
        let (transport, rx) = ChannelTransport::pair();
        let id = dispatcher.register(Arc::new(transport)).await;
        (id, rx)
    }

    fn dispatcher() -> FanoutDispatcher {
        FanoutDispatcher::new(DispatchTable::with_line_protocol(["iot_center", "test"]))
    }

    #[tokio::test]
    async fn test_delivers_only_matching_points() {
        let dispatcher = dispatcher();
        let (id, mut rx) = connect(&dispatcher).await;
        dispatcher
            .handle_message(id, r#"subscribe:[{"measurement":"dummy","tags":["host=a"]}]"#)
            .await
            .unwrap();

        let payload = b"dummy,host=a t=1 1\ndummy,host=b t=2 2\nother,host=a t=3 3\ndummy,host=a t=4 4";
        let report = dispatcher.dispatch("iot_center", payload).await;
        assert_eq!(report, DispatchReport { points: 4, deliveries: 1, failures: 0 });

        let message = rx.try_recv().unwrap();
        let points: Vec<Point> = serde_json::from_str(&message).unwrap();
        let stamps: Vec<i64> = points.iter().map(|p| p.timestamp).collect();
        assert_eq!(stamps, vec![1, 4]);
        assert_eq!(points[0].tag_pairs, vec!["host=a", "topic=iot_center"]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribed_connection_receives_nothing() {
        let dispatcher = dispatcher();
        let (_id, mut rx) = connect(&dispatcher).await;
        let report = dispatcher.dispatch("test", b"dummy,host=a t=1 1").await;
        assert_eq!(report.deliveries, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_message_keeps_subscription() {
        let dispatcher = dispatcher();
        let (id, _rx) = connect(&dispatcher).await;
        dispatcher
            .handle_message(id, r#"subscribe:[{"measurement":"dummy","tags":[]}]"#)
            .await
            .unwrap();
        let before = dispatcher.subscription(id).await;

        assert!(dispatcher.handle_message(id, "subscribe:{not json").await.is_err());
        assert!(dispatcher.handle_message(id, "hello").await.is_err());
        assert!(dispatcher
            .handle_message(id, r#"subscribe:[{"measurement":"x","tags":[]},{"tags":[]}]"#)
            .await
            .is_err());

        assert_eq!(dispatcher.subscription(id).await, before);
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let dispatcher = dispatcher();
        let (id, _rx) = connect(&dispatcher).await;
        assert!(dispatcher.unregister(id).await);
        assert!(matches!(
            dispatcher.handle_message(id, "subscribe:false").await,
            Err(ProtocolError::UnknownConnection(_))
        ));
        assert!(!dispatcher.unregister(id).await);
    }

    #[tokio::test]
    async fn test_clear_closes_transports() {
        let dispatcher = dispatcher();
        let (id, mut rx) = connect(&dispatcher).await;
        dispatcher
            .handle_message(id, r#"subscribe:[{"measurement":"dummy","tags":[]}]"#)
            .await
            .unwrap();

        assert_eq!(dispatcher.clear().await, 1);
        assert_eq!(dispatcher.clear().await, 0);
        assert_eq!(dispatcher.connection_count().await, 0);
        assert!(rx.recv().await.is_none());

        let report = dispatcher.dispatch("test", b"dummy t=1 1").await;
        assert_eq!(report, DispatchReport { points: 1, deliveries: 0, failures: 0 });
    }

    #[tokio::test]
    async fn test_dead_connection_is_pruned() {
        let dispatcher = dispatcher();
        let (dead_id, dead_rx) = connect(&dispatcher).await;
        let (live_id, mut live_rx) = connect(&dispatcher).await;
        for id in [dead_id, live_id] {
            dispatcher
                .handle_message(id, r#"subscribe:[{"measurement":"dummy","tags":[]}]"#)
                .await
                .unwrap();
        }
        drop(dead_rx);

        let report = dispatcher.dispatch("test", b"dummy t=1 1").await;
        assert_eq!(report, DispatchReport { points: 1, deliveries: 1, failures: 1 });
        assert!(live_rx.try_recv().is_ok());
        assert_eq!(dispatcher.connection_count().await, 1);
        assert!(dispatcher.subscription(dead_id).await.is_none());
    }
}
