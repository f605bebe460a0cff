//! WebSocket Gateway
//!
//! Real-time event delivery over persistent WebSocket connections.
//!
//! - **handshake**: Hello, Identify, Ready
//! - **session** / **registry**: per-connection state and the indexes that
//!   map users and guilds to sessions
//! - **router**: scope resolution and fan-out
//! - **heartbeat**: liveness deadlines and the sweeper that enforces them
//! - **handler**: the axum upgrade handler and per-connection tasks

pub mod close_code;
pub mod gateway;
pub mod handler;
pub mod handshake;
pub mod heartbeat;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;

pub use close_code::CloseCode;
pub use gateway::Gateway;
pub use handler::ws_handler;
pub use messages::{GatewayFrame, OpCode};
pub use router::PublishOutcome;
pub use session::SessionState;
