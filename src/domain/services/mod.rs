//! Domain Services
//!
//! Contracts the gateway relies on but does not implement itself.

mod authenticator;

#[cfg(test)]
pub use authenticator::MockAuthenticator;
pub use authenticator::Authenticator;
