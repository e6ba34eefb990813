use tokio::sync::mpsc;

use crate::error::{BrokerError, Result};

/// Outbound half of a stream connection
///
/// `send` must not block: the fan-out pass calls it for every matching
/// connection before yielding.
pub trait Transport: Send + Sync {
    fn send(&self, text: String) -> Result<()>;
}

/// Channel drained by a connection's writer task
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    /// Create a transport and the receiver its writer task reads from
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&self, text: String) -> Result<()> {
        self.tx
            .send(text)
            .map_err(|_| BrokerError::TransportClosed)
    }
}
