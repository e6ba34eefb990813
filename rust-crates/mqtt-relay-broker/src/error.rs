use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Relay server not started")]
    NotStarted,

    #[error("Relay server already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Reasons an inbound subscription message is rejected.
///
/// A rejected message never changes the connection's current subscription.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("unknown message, should start with 'subscribe:': {0}")]
    UnknownMessage(String),

    #[error("unparseable subscribe message {payload}: {source}")]
    Unparseable {
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("subscription message must contain an array of all subscriptions, but: {0}")]
    NotAnArray(String),

    #[error("subscription ignored, {reason} in: {element}")]
    InvalidClause { reason: &'static str, element: String },

    #[error("unknown connection {0}")]
    UnknownConnection(u64),
}
