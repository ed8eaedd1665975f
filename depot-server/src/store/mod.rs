//! Durable store
//!
//! Single redb database holding catalog, customers, orders and reservations.

mod storage;

pub use storage::{DepotStorage, StorageError, StorageResult, StorageStats};
