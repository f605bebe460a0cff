//! # Domain Layer
//!
//! Types and contracts shared by the gateway server, its collaborators and the
//! client. Nothing here performs I/O.
//!
//! ## Structure
//!
//! - **entities**: envelopes, event kinds, presence, ready snapshots
//! - **value_objects**: immutable value types (Snowflake)
//! - **services**: collaborator contracts (credential verification)

pub mod entities;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use services::*;
pub use value_objects::*;
