//! Data models
//!
//! Catalog reference data shared between depot-server and front-ends.

pub mod courier;
pub mod customer;
pub mod product;

// Re-exports
pub use courier::*;
pub use customer::*;
pub use product::*;
