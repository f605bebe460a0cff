//! HTTP Layer
//!
//! Health, metrics and internal collaborator endpoints.

pub mod handlers;
pub mod routes;
