//! User presence as reported by clients.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::domain::value_objects::Snowflake;

/// Online status selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Online,
    Idle,
    Dnd,
    Invisible,
    Offline,
}

impl Status {
    /// Status as seen by other users; invisible users appear offline.
    pub fn visible(self) -> Status {
        match self {
            Status::Invisible => Status::Offline,
            other => other,
        }
    }
}

/// Presence carried by Identify and op 3 Presence Update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Presence {
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub activities: Vec<Value>,
    #[serde(default)]
    pub afk: bool,
    #[serde(default)]
    pub since: Option<i64>,
}

impl Presence {
    pub fn offline() -> Self {
        Self {
            status: Status::Offline,
            ..Self::default()
        }
    }

    /// Build the `PRESENCE_UPDATE` payload for one guild.
    pub fn to_event_payload(&self, user_id: Snowflake, guild_id: Option<Snowflake>) -> Value {
        let status = self.status.visible();
        let activities = if status == Status::Offline {
            Vec::new()
        } else {
            self.activities.clone()
        };
        json!({
            "user": { "id": user_id },
            "guild_id": guild_id,
            "status": status,
            "activities": activities,
        })
    }
}
