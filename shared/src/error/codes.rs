//! Unified error codes for the Depot services
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Order errors
//! - 6xxx: Product / stock errors
//! - 7xxx: Courier errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so front-ends (chat bot,
/// admin tools) can localize them without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,

    // ==================== 4xxx: Order ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Transition not allowed from the current status
    InvalidTransition = 4002,
    /// Order already reached a terminal status
    OrderClosed = 4003,
    /// Order hold expired before confirmation
    OrderExpired = 4004,
    /// Order has no items
    EmptyOrder = 4005,
    /// Acting courier is not the assigned courier
    AuthorizationMismatch = 4006,

    // ==================== 6xxx: Product ====================
    /// Product not found
    ProductNotFound = 6001,
    /// Product is not active
    ProductInactive = 6002,
    /// Not enough unreserved stock
    InsufficientStock = 6003,
    /// Deduction would drive stock below zero
    NegativeStock = 6004,

    // ==================== 7xxx: Courier ====================
    /// Courier not found or inactive
    CourierNotFound = 7001,

    // ==================== 9xxx: System ====================
    /// Internal error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// External ledger unreachable or rejected the write
    ExternalSyncFailure = 9003,
    /// Configuration error
    ConfigError = 9004,
}

impl ErrorCode {
    /// Get the numeric code
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Whether the error is meant to be shown to the end user.
    ///
    /// Sync failures and integrity violations stay internal.
    pub const fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            ErrorCode::NegativeStock
                | ErrorCode::ExternalSyncFailure
                | ErrorCode::InternalError
                | ErrorCode::DatabaseError
                | ErrorCode::ConfigError
        )
    }

    /// Default English message (front-ends localize by code)
    pub const fn message(&self) -> &'static str {
        match self {
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",

            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::InvalidTransition => "Order status does not allow this operation",
            ErrorCode::OrderClosed => "Order is already closed",
            ErrorCode::OrderExpired => "Order reservation has expired",
            ErrorCode::EmptyOrder => "Order has no items",
            ErrorCode::AuthorizationMismatch => "Order is assigned to another courier",

            ErrorCode::ProductNotFound => "Product not found",
            ErrorCode::ProductInactive => "Product is not available",
            ErrorCode::InsufficientStock => "Insufficient stock",
            ErrorCode::NegativeStock => "Stock integrity violation",

            ErrorCode::CourierNotFound => "Courier not found",

            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ExternalSyncFailure => "External ledger synchronization failed",
            ErrorCode::ConfigError => "Configuration error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{:04}", self.code())
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ErrorCode::Success),
            1 => Ok(ErrorCode::Unknown),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),

            4001 => Ok(ErrorCode::OrderNotFound),
            4002 => Ok(ErrorCode::InvalidTransition),
            4003 => Ok(ErrorCode::OrderClosed),
            4004 => Ok(ErrorCode::OrderExpired),
            4005 => Ok(ErrorCode::EmptyOrder),
            4006 => Ok(ErrorCode::AuthorizationMismatch),

            6001 => Ok(ErrorCode::ProductNotFound),
            6002 => Ok(ErrorCode::ProductInactive),
            6003 => Ok(ErrorCode::InsufficientStock),
            6004 => Ok(ErrorCode::NegativeStock),

            7001 => Ok(ErrorCode::CourierNotFound),

            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::ExternalSyncFailure),
            9004 => Ok(ErrorCode::ConfigError),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}
