//! Ready state snapshot and its repository trait.
//!
//! The snapshot is the minimum state a client needs to render after
//! identifying. It is owned by the REST/domain collaborator; the gateway only
//! reads it once per handshake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::value_objects::Snowflake;
use crate::shared::error::GatewayError;

/// Guild entry in the ready snapshot. Only `id` is interpreted by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildSummary {
    pub id: Snowflake,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Relationship entry (friend, block, pending request)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// The other user's id
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// State loaded at identify time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyState {
    pub user: Value,
    #[serde(default)]
    pub guilds: Vec<GuildSummary>,
    #[serde(default)]
    pub private_channels: Vec<Value>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

impl ReadyState {
    /// Minimal snapshot for a user with no guilds, channels or relationships.
    pub fn empty(user_id: Snowflake) -> Self {
        let mut user = Map::new();
        user.insert("id".into(), Value::String(user_id.to_string()));
        Self {
            user: Value::Object(user),
            guilds: Vec::new(),
            private_channels: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn guild_ids(&self) -> Vec<Snowflake> {
        self.guilds.iter().map(|g| g.id).collect()
    }

    pub fn contact_ids(&self) -> Vec<Snowflake> {
        self.relationships.iter().map(|r| r.id).collect()
    }
}

/// Source of ready snapshots (implemented by the REST collaborator)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadyStateRepository: Send + Sync {
    /// Load the current snapshot for a user.
    async fn load(&self, user_id: Snowflake) -> Result<ReadyState, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_state_keeps_unknown_fields() {
        let state: ReadyState = serde_json::from_value(json!({
            "user": {"id": "1", "username": "alice"},
            "guilds": [{"id": "10", "name": "rust", "member_count": 3}],
            "relationships": [{"id": "2", "type": 1, "nickname": "bob"}]
        }))
        .unwrap();

        assert_eq!(state.guild_ids(), vec![Snowflake(10)]);
        assert_eq!(state.contact_ids(), vec![Snowflake(2)]);
        assert_eq!(state.guilds[0].extra["name"], json!("rust"));

        let round = serde_json::to_value(&state).unwrap();
        assert_eq!(round["guilds"][0]["member_count"], json!(3));
        assert_eq!(round["relationships"][0]["type"], json!(1));
    }

    #[test]
    fn test_empty_state() {
        let state = ReadyState::empty(Snowflake(8));
        assert_eq!(state.user["id"], json!("8"));
        assert!(state.guild_ids().is_empty());
    }
}
