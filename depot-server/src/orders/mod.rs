//! Order lifecycle
//!
//! - **manager**: `OrdersManager`, the order state machine
//! - **pricing**: tiered cart pricing and totals
//! - **maintenance**: periodic expiry, repair, cleanup, catalog refresh and
//!   reminder jobs
//!
//! # Lifecycle
//!
//! ```text
//! create ──► buffer ──confirm──► pending ──assign──► courier_assigned ──deliver──► delivered
//!              │                    │                     │                          │
//!              ├─expire─► expired   └─cancel─► cancelled ◄┤                  commit_delivery
//!              └─cancel─► cancelled                       └─► not_issued ──► purged
//! ```
//!
//! Every transition that touches stock runs inside one
//! `ReservationLedger::transact` section. External ledger writes are queued
//! after the commit and never block or fail a transition.

pub mod maintenance;
pub mod manager;
pub mod pricing;

// Re-exports
pub use maintenance::{MaintenanceScheduler, MaintenanceSettings, RefreshError, refresh_catalog};
pub use manager::{
    DEFAULT_REMINDER_OFFSET_DAYS, LedgerStatus, ManagerError, ManagerResult, ManagerSettings,
    OrdersManager,
};
pub use pricing::{CartLine, PriceTable, PricingError, compute_totals};
