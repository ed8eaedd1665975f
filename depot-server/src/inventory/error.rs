//! Ledger errors

use crate::store::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: u64,
        requested: u32,
        available: u32,
    },

    #[error("Final deduction would drive product {product_id} negative: available {available}, deducting {requested}")]
    NegativeStock {
        product_id: u64,
        available: u32,
        requested: u32,
    },

    #[error("Product not found: {0}")]
    ProductNotFound(u64),

    #[error("Product inactive: {0}")]
    ProductInactive(u64),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<redb::CommitError> for LedgerError {
    fn from(err: redb::CommitError) -> Self {
        LedgerError::Storage(err.into())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
