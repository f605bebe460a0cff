//! Reconnecting gateway client.
//!
//! Used by services and tools that consume the gateway the way end-user
//! clients do.

pub mod backoff;
pub mod controller;
pub mod error;
pub mod events;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use controller::{ClientConfig, ClientState, GatewayClient, NoopResynchronizer, Resynchronizer};
pub use error::ClientError;
pub use events::ClientEvent;
pub use transport::{Connector, Transport, TransportEvent, WsConnector};
