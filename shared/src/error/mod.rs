//! Unified error codes for Depot
//!
//! - [`ErrorCode`]: Standardized error codes returned to front-ends
//! - [`ErrorCategory`]: Classification of errors by domain
//!
//! Each service layer keeps its own `thiserror` enum and maps it onto an
//! [`ErrorCode`] at the boundary.

mod category;
mod codes;

pub use category::ErrorCategory;
pub use codes::{ErrorCode, InvalidErrorCode};
