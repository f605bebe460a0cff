//! Credential verification contract.

use async_trait::async_trait;

use crate::domain::value_objects::Snowflake;
use crate::shared::error::AuthError;

/// Verifies the bearer credential carried by Identify.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve a token to the authenticated user id.
    async fn authenticate(&self, token: &str) -> Result<Snowflake, AuthError>;
}
