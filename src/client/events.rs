//! Events surfaced by the client controller.

use serde_json::Value;
use std::time::Duration;

use crate::domain::EventKind;
use crate::presentation::websocket::messages::ReadyPayload;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A connection attempt is starting (0 for the first try after Ready)
    Connecting { attempt: u32 },
    /// Identify succeeded; any resynchronization already ran
    Ready(Box<ReadyPayload>),
    Dispatch {
        kind: EventKind,
        sequence: u64,
        data: Value,
    },
    /// A dispatch sequence number was skipped. The client has no replay, so
    /// the application should refetch the affected state.
    SequenceGap { expected: u64, received: u64 },
    /// The connection ended; `code` is the websocket close code when one was
    /// received
    Disconnected { code: Option<u16> },
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Credential rejected. Terminal: the client stops.
    AuthenticationFailed,
    /// The attempt limit was reached. Terminal.
    ReconnectExhausted { attempts: u32 },
}
