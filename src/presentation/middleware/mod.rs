//! Middleware
//!
//! Tower middleware for request processing.

pub mod internal_auth;
pub mod logging;

pub use internal_auth::internal_auth_middleware;
