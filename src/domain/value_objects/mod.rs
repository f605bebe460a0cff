//! Value Objects
//!
//! Immutable value types shared by every layer.

mod snowflake;

pub use snowflake::Snowflake;
