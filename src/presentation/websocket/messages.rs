//! WebSocket Message Types
//!
//! Discord-compatible gateway message formats. The same frame type is used by
//! the server and by the client controller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{GuildSummary, Presence, Relationship, Snowflake, Status};

/// Gateway opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    /// Event dispatch
    Dispatch = 0,
    /// Heartbeat (either direction)
    Heartbeat = 1,
    /// Identify
    Identify = 2,
    /// Presence update
    PresenceUpdate = 3,
    /// Voice state update
    VoiceStateUpdate = 4,
    /// Reconnect
    Reconnect = 7,
    /// Invalid session
    InvalidSession = 9,
    /// Hello
    Hello = 10,
    /// Heartbeat ACK
    HeartbeatAck = 11,
}

impl TryFrom<u16> for OpCode {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => OpCode::Dispatch,
            1 => OpCode::Heartbeat,
            2 => OpCode::Identify,
            3 => OpCode::PresenceUpdate,
            4 => OpCode::VoiceStateUpdate,
            7 => OpCode::Reconnect,
            9 => OpCode::InvalidSession,
            10 => OpCode::Hello,
            11 => OpCode::HeartbeatAck,
            other => return Err(other),
        })
    }
}

/// Wire frame `{op, d, s, t}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u16,
    #[serde(default)]
    pub d: Option<Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

impl GatewayFrame {
    pub fn new(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op: op as u16,
            d,
            s: None,
            t: None,
        }
    }

    pub fn dispatch(event: &str, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch as u16,
            d: Some(data),
            s: Some(sequence),
            t: Some(event.to_string()),
        }
    }

    pub fn opcode(&self) -> Result<OpCode, u16> {
        OpCode::try_from(self.op)
    }

    /// Deserialize the `d` field into a typed payload.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.d.clone().unwrap_or(Value::Null))
    }
}

/// Hello payload (op 10)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

/// Identify payload (op 2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    #[serde(default)]
    pub properties: ConnectionProperties,
    #[serde(default)]
    pub presence: Option<Presence>,
}

/// Identify connection properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionProperties {
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub device: String,
}

/// Voice state update request (op 4)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateRequest {
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
    #[serde(default)]
    pub self_mute: bool,
    #[serde(default)]
    pub self_deaf: bool,
}

/// Presence entry included in Ready for known contacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub user_id: Snowflake,
    pub status: Status,
    #[serde(default)]
    pub activities: Vec<Value>,
}

/// Ready payload (dispatch READY)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub v: u8,
    pub session_id: String,
    pub user: Value,
    pub guilds: Vec<GuildSummary>,
    pub private_channels: Vec<Value>,
    pub relationships: Vec<Relationship>,
    pub presences: Vec<PresenceSnapshot>,
}

pub const GATEWAY_VERSION: u8 = 10;
