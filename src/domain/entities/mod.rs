//! # Domain Entities
//!
//! Values that cross the gateway boundary.
//!
//! - **EventKind**: every dispatch name the gateway knows
//! - **EventEnvelope**: `{type, scope, payload}` handed over by collaborators
//! - **Presence**: client-reported status and activities
//! - **ReadyState**: snapshot sent in the `READY` dispatch
//!
//! ## Repository Traits
//!
//! `ReadyStateRepository` is implemented in the infrastructure layer.

mod envelope;
mod event;
mod presence;
mod ready;

pub use envelope::{EventEnvelope, MembershipChange, PublishRequest, Scope};
pub use event::EventKind;
pub use presence::{Presence, Status};
#[cfg(test)]
pub use ready::MockReadyStateRepository;
pub use ready::{GuildSummary, ReadyState, ReadyStateRepository, Relationship};
