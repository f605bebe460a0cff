//! Credential verification implementations.

mod jwt;

pub use jwt::{Claims, JwtAuthenticator};
