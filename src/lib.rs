//! # Chat Gateway Library
//!
//! The real-time half of a Discord-compatible chat server:
//! - WebSocket gateway (Hello / Identify / Ready, heartbeats, dispatch)
//! - Event routing by guild, user, or channel recipients
//! - Internal HTTP API the REST service publishes committed mutations through
//! - A reconnecting gateway client
//!
//! ## Module Structure
//!
//! ```text
//! chat_gateway/
//! +-- config/         Configuration management
//! +-- domain/         Envelopes, event kinds, presence, collaborator traits
//! +-- infrastructure/ JWT verification, ready-state sources, metrics
//! +-- presentation/   WebSocket gateway and HTTP routes
//! +-- client/         Reconnecting gateway client
//! +-- shared/         Error types
//! ```

// Configuration module
pub mod config;

// Domain layer
pub mod domain;

// Infrastructure layer - External implementations
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Gateway client
pub mod client;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
