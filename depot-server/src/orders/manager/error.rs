use crate::inventory::LedgerError;
use crate::orders::pricing::PricingError;
use crate::services::CatalogError;
use crate::store::StorageError;
use shared::error::ErrorCode;
use shared::order::OrderStatus;
use thiserror::Error;

/// Manager errors
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Order not found: {0}")]
    OrderNotFound(u64),

    #[error("Order {order_id}: transition {from} -> {to} not allowed")]
    InvalidTransition {
        order_id: u64,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("Order {order_id} is closed ({status})")]
    OrderClosed { order_id: u64, status: OrderStatus },

    #[error("Order {0} expired before confirmation")]
    OrderExpired(u64),

    #[error("Order has no items")]
    EmptyOrder,

    #[error("Order {order_id}: courier {acting} is not the assigned courier")]
    AuthorizationMismatch {
        order_id: u64,
        assigned: Option<u64>,
        acting: u64,
    },

    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: u64,
        requested: u32,
        available: u32,
    },

    #[error("Stock of product {product_id} would go negative")]
    NegativeStock { product_id: u64 },

    #[error("Product not found: {0}")]
    ProductNotFound(u64),

    #[error("Product inactive: {0}")]
    ProductInactive(u64),

    #[error("Courier not found or inactive: {0}")]
    CourierNotFound(u64),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ManagerError {
    /// Error code for front-ends (they localize, we never send prose)
    pub fn code(&self) -> ErrorCode {
        match self {
            ManagerError::Storage(_) => ErrorCode::DatabaseError,
            ManagerError::OrderNotFound(_) => ErrorCode::OrderNotFound,
            ManagerError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            ManagerError::OrderClosed { .. } => ErrorCode::OrderClosed,
            ManagerError::OrderExpired(_) => ErrorCode::OrderExpired,
            ManagerError::EmptyOrder => ErrorCode::EmptyOrder,
            ManagerError::AuthorizationMismatch { .. } => ErrorCode::AuthorizationMismatch,
            ManagerError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
            ManagerError::NegativeStock { .. } => ErrorCode::NegativeStock,
            ManagerError::ProductNotFound(_) => ErrorCode::ProductNotFound,
            ManagerError::ProductInactive(_) => ErrorCode::ProductInactive,
            ManagerError::CourierNotFound(_) => ErrorCode::CourierNotFound,
            ManagerError::Validation(_) => ErrorCode::ValidationFailed,
            ManagerError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl From<StorageError> for ManagerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::OrderNotFound(id) => ManagerError::OrderNotFound(id),
            other => {
                tracing::error!(error = %other, "Storage error occurred");
                ManagerError::Storage(other)
            }
        }
    }
}

impl From<LedgerError> for ManagerError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientStock {
                product_id,
                requested,
                available,
            } => ManagerError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            LedgerError::NegativeStock { product_id, .. } => {
                ManagerError::NegativeStock { product_id }
            }
            LedgerError::ProductNotFound(id) => ManagerError::ProductNotFound(id),
            LedgerError::ProductInactive(id) => ManagerError::ProductInactive(id),
            LedgerError::Storage(e) => e.into(),
        }
    }
}

impl From<PricingError> for ManagerError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::ProductNotFound(id) => ManagerError::ProductNotFound(id),
            PricingError::ProductInactive(id) => ManagerError::ProductInactive(id),
            other => ManagerError::Validation(other.to_string()),
        }
    }
}

impl From<CatalogError> for ManagerError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::Storage(e) => e.into(),
            other => ManagerError::Internal(other.to_string()),
        }
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;
