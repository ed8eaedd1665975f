//! Ledger sync errors
//!
//! None of these ever reach a lifecycle caller. They are logged and the
//! repair sweep retries whatever did not land.

use crate::store::StorageError;
use shared::order::OrderStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Sheets API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("External ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Tab not found: {0}")]
    TabNotFound(String),

    #[error("Tab {tab} is missing column {column}")]
    MissingColumn { tab: String, column: String },

    #[error("Order not found: {0}")]
    OrderNotFound(u64),

    #[error("Order {order_id} is {status}, expected {expected}")]
    UnexpectedStatus {
        order_id: u64,
        status: OrderStatus,
        expected: OrderStatus,
    },

    #[error("{op} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: String,
        attempts: u32,
        last: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SyncError {
    /// Worth another attempt with the same request
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Http(_) | SyncError::Unavailable(_) => true,
            SyncError::Api { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
