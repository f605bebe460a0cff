//! Ready-state snapshots fetched from the REST service.
//!
//! `GET {base}/users/{user_id}/ready` with the internal bearer token. The
//! response body is the `ReadyState` JSON shape.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::domain::{ReadyState, ReadyStateRepository, Snowflake};
use crate::shared::error::GatewayError;

#[derive(Debug, Clone)]
pub struct HttpReadyStateRepository {
    http: Client,
    base_url: String,
    token: String,
}

impl HttpReadyStateRepository {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("chat-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::StateUnavailable(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, user_id: Snowflake) -> String {
        format!("{}/users/{}/ready", self.base_url, user_id)
    }
}

#[async_trait]
impl ReadyStateRepository for HttpReadyStateRepository {
    async fn load(&self, user_id: Snowflake) -> Result<ReadyState, GatewayError> {
        let response = self
            .http
            .get(self.url(user_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| GatewayError::StateUnavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<ReadyState>()
                .await
                .map_err(|e| GatewayError::StateUnavailable(format!("invalid ready state: {e}"))),
            // The REST service does not know the user yet; treat as a fresh account
            StatusCode::NOT_FOUND => Ok(ReadyState::empty(user_id)),
            status => Err(GatewayError::StateUnavailable(format!(
                "ready state request failed with {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_trims_trailing_slash() {
        let repo =
            HttpReadyStateRepository::new("http://rest.local/api/", "token", Duration::from_secs(1))
                .unwrap();
        assert_eq!(repo.url(Snowflake(5)), "http://rest.local/api/users/5/ready");
    }
}
