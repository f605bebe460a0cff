//! In-process ready-state store.
//!
//! Used when no REST collaborator URL is configured, and by tests. Users
//! without an entry get an empty snapshot.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::{ReadyState, ReadyStateRepository, Snowflake};
use crate::shared::error::GatewayError;

#[derive(Default)]
pub struct InMemoryReadyStateRepository {
    states: DashMap<Snowflake, ReadyState>,
}

impl InMemoryReadyStateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user_id: Snowflake, state: ReadyState) {
        self.states.insert(user_id, state);
    }

    pub fn remove(&self, user_id: Snowflake) -> Option<ReadyState> {
        self.states.remove(&user_id).map(|(_, state)| state)
    }
}

#[async_trait]
impl ReadyStateRepository for InMemoryReadyStateRepository {
    async fn load(&self, user_id: Snowflake) -> Result<ReadyState, GatewayError> {
        Ok(self
            .states
            .get(&user_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| ReadyState::empty(user_id)))
    }
}
