//! Order domain types
//!
//! Persisted by depot-server and consumed by front-ends.

pub mod status;
pub mod types;

pub use status::OrderStatus;
pub use types::*;
