//! Filtered MQTT → WebSocket measurement relay
//!
//! This crate turns line protocol payloads received on upstream topics into
//! points and fans them out to WebSocket clients, each of which only receives
//! the points matching the filter it declared.
//!
//! # Components
//!
//! - [`DispatchTable`] - topic → parser mapping, appends `topic=<topic>`
//! - [`ConnectionRegistry`] - per-connection transport and subscription
//! - [`matcher`] - point ↔ subscription matching
//! - [`FanoutDispatcher`] - parse once, deliver per connection
//! - [`protocol`] - `subscribe:<JSON>` decoding, outbound encoding
//! - [`RelayServer`] - WebSocket listener wiring clients to the dispatcher
//!
//! # Client protocol
//!
//! ```text
//! > subscribe:[{"measurement":"environment","tags":["a=b"]}]
//! < [{"measurement":"environment","tagPairs":["a=b","topic=iot_center"],"fields":{"CO2":2572},"timestamp":"1629357840000000000"}]
//! > subscribe:false
//! ```
//!
//! # Example Usage
//!
//! ```no_run
//! use mqtt_relay_broker::{DispatchTable, FanoutDispatcher, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let table = DispatchTable::with_line_protocol(["iot_center", "test"]);
//!     let dispatcher = FanoutDispatcher::new(table);
//!
//!     let server = RelayServer::new("127.0.0.1:5000", dispatcher.clone());
//!     server.start().await?;
//!
//!     // Feed upstream payloads as they arrive
//!     dispatcher.dispatch("iot_center", b"dummy,host=pi temperature=21.5").await;
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod dispatch;
pub mod dispatcher;
pub mod error;
pub mod line_protocol;
pub mod matcher;
pub mod point;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod subscription;
pub mod transport;

// Re-exports
pub use dispatch::{DispatchTable, ParserFn};
pub use dispatcher::{DispatchReport, FanoutDispatcher};
pub use error::{BrokerError, ProtocolError, Result};
pub use point::{FieldValue, Point};
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use server::RelayServer;
pub use subscription::{Clause, SubscriptionState, SubscriptionUpdate};
pub use transport::{ChannelTransport, Transport};
