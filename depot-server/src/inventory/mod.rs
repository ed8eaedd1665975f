//! Reservation ledger
//!
//! Owns the in-memory "reserved quantity per product" counters and every
//! mutation of them. Counters are a cache of the reservation rows in the
//! durable store and are rebuilt from it on startup.

mod error;
mod ledger;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{HoldTxn, ReservationLedger};
