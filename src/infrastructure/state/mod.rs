//! Ready-state repository implementations.

mod http;
mod memory;

pub use http::HttpReadyStateRepository;
pub use memory::InMemoryReadyStateRepository;
