//! Shared types for Depot
//!
//! Domain types used by depot-server and its front-ends: catalog models,
//! orders and reservations, error codes and time helpers.

pub mod error;
pub mod models;
pub mod order;
pub mod util;

// Re-exports
pub use error::{ErrorCategory, ErrorCode};
pub use models::{Category, Courier, CustomerSegment, Product};
pub use order::{Order, OrderItem, OrderStatus, Reservation, Totals};
pub use serde::{Deserialize, Serialize};
