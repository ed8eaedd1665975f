//! External ledger synchronization
//!
//! - **gateway**: idempotent record / commit / cancel writes, the repair sweep
//!   and catalog reads
//! - **sheet**: tab layout and keyed row lookup
//! - **transport**: `SheetTransport` seam plus the in-memory implementation
//! - **http**: Google Sheets transport
//! - **worker**: job queue between the lifecycle and the gateway
//! - **retry**: fixed-attempt retry policy

mod error;
pub mod gateway;
pub mod http;
pub mod retry;
pub mod sheet;
pub mod transport;
pub mod worker;

pub use error::{SyncError, SyncResult};
pub use gateway::{CommitOutcome, LedgerSyncGateway, RepairReport, SheetCatalog};
pub use http::HttpSheetTransport;
pub use retry::RetryPolicy;
pub use sheet::{ProductRecord, SheetLayout, SheetMode};
pub use transport::{MemorySheetTransport, SheetTransport};
pub use worker::{SYNC_QUEUE_CAPACITY, SyncHandle, SyncJob, SyncWorker};
