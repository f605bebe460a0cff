//! JWT credential verification for Identify.

use async_trait::async_trait;
use jsonwebtoken::{decode, errors::ErrorKind, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::domain::{Authenticator, Snowflake};
use crate::shared::error::AuthError;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at time (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

/// HS256 verifier sharing its secret with the REST service that issues tokens
#[derive(Clone)]
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Decode and validate a token, returning the user id in `sub`.
    pub fn verify(&self, token: &str) -> Result<Snowflake, AuthError> {
        let token_data =
            decode::<Claims>(token, &self.key, &self.validation).map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken,
            })?;

        token_data
            .claims
            .sub
            .parse()
            .map_err(|_| AuthError::InvalidClaims)
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Snowflake, AuthError> {
        self.verify(token)
    }
}
