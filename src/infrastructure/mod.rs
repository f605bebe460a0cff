//! Infrastructure Layer
//!
//! Contains implementations for external services including:
//! - JWT credential verification
//! - Ready-state repositories (REST collaborator over HTTP, in-memory)
//! - Prometheus metrics

pub mod auth;
pub mod metrics;
pub mod state;
