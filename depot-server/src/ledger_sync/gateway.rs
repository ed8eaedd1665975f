//! Ledger Sync Gateway
//!
//! Idempotent writes of order state into the external spreadsheet:
//!
//! | Operation | External effect | Local effect |
//! |-----------|-----------------|--------------|
//! | `append_record` | append a `pending` row | none |
//! | `commit_delivery` | rewrite row, decrement stock | set `external_sync_committed` |
//! | `record_cancelled` | rewrite row status | set `external_sync_committed` |
//!
//! The local flag is flipped only after every external write landed, so a
//! failure anywhere leaves the order in the `unsynced_deliveries` (or
//! `unsynced_cancellations`) index and the repair sweep picks it up again.
//! Stock decrements are recorded per product as they land; a retried commit
//! only writes the products still missing.
//!
//! The gateway also reads the catalog and the price tiers back from the
//! sheet for the periodic catalog refresh.

use super::retry::RetryPolicy;
use super::sheet::{
    COURIER_COLUMNS, ORDER_KEY_COLUMNS, OrderSheet, PRICES_TAB, PRODUCT_COLUMNS, ProductRecord,
    ProductSheet, SheetLayout, check_header, order_row_cells, parse_couriers,
    parse_price_tiers, parse_product_records,
};
use super::transport::SheetTransport;
use super::{SyncError, SyncResult};
use crate::store::DepotStorage;
use dashmap::DashSet;
use serde::Serialize;
use shared::models::Courier;
use shared::order::{Order, OrderItem, OrderStatus};
use shared::util::millis_to_rfc3339;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// This call wrote the terminal state and flipped the flag
    Committed,
    /// The flag was already set, nothing written
    AlreadyCommitted,
    /// Another call for the same order is running
    InFlight,
}

/// Result of one repair sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// Deliveries and cancellations examined
    pub scanned: usize,
    /// Deliveries committed by this sweep
    pub committed: usize,
    /// Cancellations written by this sweep
    pub cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Products and couriers as listed in the sheet
#[derive(Debug, Clone, Default)]
pub struct SheetCatalog {
    pub products: Vec<ProductRecord>,
    pub couriers: Vec<Courier>,
}

/// Removes the order from the in-flight set when dropped
struct InFlightGuard<'a> {
    set: &'a DashSet<u64>,
    order_id: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.order_id);
    }
}

pub struct LedgerSyncGateway {
    storage: DepotStorage,
    transport: Arc<dyn SheetTransport>,
    layout: SheetLayout,
    retry: RetryPolicy,
    in_flight: DashSet<u64>,
}

impl std::fmt::Debug for LedgerSyncGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerSyncGateway")
            .field("layout", &self.layout)
            .field("retry", &self.retry)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl LedgerSyncGateway {
    pub fn new(
        storage: DepotStorage,
        transport: Arc<dyn SheetTransport>,
        layout: SheetLayout,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            transport,
            layout,
            retry,
            in_flight: DashSet::new(),
        }
    }

    pub fn layout(&self) -> &SheetLayout {
        &self.layout
    }

    fn claim(&self, order_id: u64) -> Option<InFlightGuard<'_>> {
        self.in_flight.insert(order_id).then(|| InFlightGuard {
            set: &self.in_flight,
            order_id,
        })
    }

    async fn read_tab(&self, tab: &str) -> SyncResult<Vec<Vec<String>>> {
        self.retry
            .run("read_rows", || self.transport.read_rows(tab))
            .await
    }

    async fn write_cell(&self, tab: &str, row: usize, column: usize, value: String) -> SyncResult<()> {
        self.retry
            .run("update_cells", || {
                self.transport
                    .update_cells(tab, row, column, vec![value.clone()])
            })
            .await
    }

    /// Verify that the products, couriers and orders tabs exist with their key columns
    pub async fn validate_schema(&self) -> SyncResult<()> {
        let tabs = self
            .retry
            .run("list_tabs", || self.transport.list_tabs())
            .await?;

        let required = [
            (self.layout.products_tab(), PRODUCT_COLUMNS),
            (self.layout.couriers_tab(), COURIER_COLUMNS),
            (self.layout.orders_tab(), ORDER_KEY_COLUMNS),
        ];
        for (tab, columns) in required {
            if !tabs.contains(&tab) {
                return Err(SyncError::TabNotFound(tab));
            }
            let rows = self.read_tab(&tab).await?;
            check_header(&tab, &rows, columns)?;
        }

        tracing::info!(mode = ?self.layout.mode, city = %self.layout.city, "External ledger schema validated");
        Ok(())
    }

    /// Append the `pending` row of a freshly confirmed order
    pub async fn append_record(&self, order: &Order) -> SyncResult<()> {
        let tab = self.layout.orders_tab();
        let cells = order_row_cells(order, &self.layout.city, OrderStatus::Pending, false);
        self.retry
            .run("append_rows", || {
                self.transport.append_rows(&tab, vec![cells.clone()])
            })
            .await?;
        tracing::debug!(order_id = order.id, tab = %tab, "Order row appended");
        Ok(())
    }

    /// Write the delivered state externally, then flip the local flag
    ///
    /// Safe to call any number of times; once the flag is set further calls
    /// write nothing.
    pub async fn commit_delivery(&self, order_id: u64) -> SyncResult<CommitOutcome> {
        let Some(_guard) = self.claim(order_id) else {
            tracing::debug!(order_id, "Commit already in flight");
            return Ok(CommitOutcome::InFlight);
        };

        let order = self
            .storage
            .get_order(order_id)?
            .ok_or(SyncError::OrderNotFound(order_id))?;
        if order.external_sync_committed {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        if order.status != OrderStatus::Delivered {
            return Err(SyncError::UnexpectedStatus {
                order_id,
                status: order.status,
                expected: OrderStatus::Delivered,
            });
        }

        self.write_terminal_row(&order).await?;
        self.decrement_stock(order_id, &order.items).await?;
        self.finish(order_id)
    }

    /// Write the cancelled status externally, then flip the local flag
    pub async fn record_cancelled(&self, order_id: u64) -> SyncResult<CommitOutcome> {
        let Some(_guard) = self.claim(order_id) else {
            return Ok(CommitOutcome::InFlight);
        };

        let order = self
            .storage
            .get_order(order_id)?
            .ok_or(SyncError::OrderNotFound(order_id))?;
        if order.external_sync_committed {
            return Ok(CommitOutcome::AlreadyCommitted);
        }
        if order.status != OrderStatus::Cancelled {
            return Err(SyncError::UnexpectedStatus {
                order_id,
                status: order.status,
                expected: OrderStatus::Cancelled,
            });
        }

        self.write_terminal_row(&order).await?;
        self.finish(order_id)
    }

    fn finish(&self, order_id: u64) -> SyncResult<CommitOutcome> {
        if self.storage.mark_external_synced(order_id)? {
            tracing::info!(order_id, "External ledger commit confirmed");
            Ok(CommitOutcome::Committed)
        } else {
            Ok(CommitOutcome::AlreadyCommitted)
        }
    }

    /// Rewrite the order's row in place, or append a terminal row when it is missing
    async fn write_terminal_row(&self, order: &Order) -> SyncResult<()> {
        let tab = self.layout.orders_tab();
        let rows = self.read_tab(&tab).await?;
        let sheet = OrderSheet::from_rows(&tab, &rows)?;
        let delivered = order.status == OrderStatus::Delivered;

        let Some(row) = sheet.locate(order.id) else {
            tracing::warn!(order_id = order.id, status = %order.status, "Order row missing, appending terminal row");
            let cells = order_row_cells(order, &self.layout.city, order.status, delivered);
            return self
                .retry
                .run("append_rows", || {
                    self.transport.append_rows(&tab, vec![cells.clone()])
                })
                .await;
        };

        self.write_cell(&tab, row, sheet.status_column, order.status.as_str().to_string())
            .await?;
        if delivered {
            let delivered_at = order.delivered_at.map(millis_to_rfc3339).unwrap_or_default();
            self.write_cell(&tab, row, sheet.delivered_at_column, delivered_at)
                .await?;
            self.write_cell(&tab, row, sheet.committed_column, "1".to_string())
                .await?;
        }
        Ok(())
    }

    /// Subtract delivered quantities from the products tab (clamped at zero)
    ///
    /// Values are computed from one read and written as absolute numbers.
    /// Each product is recorded in the store once its cell landed, so a commit
    /// retried after a partial failure never subtracts a product twice.
    async fn decrement_stock(&self, order_id: u64, items: &[OrderItem]) -> SyncResult<()> {
        let done = self.storage.stock_commits(order_id)?;
        let remaining: Vec<OrderItem> = items
            .iter()
            .filter(|i| !done.contains(&i.product_id))
            .cloned()
            .collect();
        if remaining.is_empty() {
            return Ok(());
        }
        if !done.is_empty() {
            tracing::info!(order_id, already_written = done.len(), "Resuming partial stock decrement");
        }

        let tab = self.layout.products_tab();
        let rows = self.read_tab(&tab).await?;
        let sheet = ProductSheet::from_rows(&tab, &rows)?;
        let (updates, missing) = sheet.stock_updates(&remaining);

        for product_id in missing {
            tracing::warn!(order_id, product_id, tab = %tab, "Product missing from external stock tab");
        }
        for update in updates {
            // Deactivation is idempotent, so it goes before the stock cell
            if let Some(column) = update.deactivate_column {
                self.write_cell(&tab, update.row, column, "FALSE".to_string())
                    .await?;
                tracing::info!(product_id = update.product_id, "Product sold out, deactivated externally");
            }
            self.write_cell(&tab, update.row, update.stock_column, update.new_stock.to_string())
                .await?;
            self.storage.record_stock_commit(order_id, update.product_id)?;
        }
        Ok(())
    }

    /// Commit every delivered order and every published cancellation whose
    /// external write has not landed
    ///
    /// Never fails as a whole; per-order failures are counted and logged.
    pub async fn run_repair_sweep(&self) -> RepairReport {
        let deliveries = self.storage.list_unsynced_deliveries().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Repair sweep could not read unsynced deliveries");
            Vec::new()
        });
        let cancellations = self.storage.list_unsynced_cancellations().unwrap_or_else(|e| {
            tracing::error!(error = %e, "Repair sweep could not read unsynced cancellations");
            Vec::new()
        });

        let mut report = RepairReport {
            scanned: deliveries.len() + cancellations.len(),
            ..Default::default()
        };
        for order_id in deliveries {
            match self.commit_delivery(order_id).await {
                Ok(CommitOutcome::Committed) => report.committed += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(order_id, error = %e, "Repair commit failed");
                }
            }
        }
        for order_id in cancellations {
            match self.record_cancelled(order_id).await {
                Ok(CommitOutcome::Committed) => report.cancelled += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(order_id, error = %e, "Repair cancellation failed");
                }
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                scanned = report.scanned,
                committed = report.committed,
                cancelled = report.cancelled,
                skipped = report.skipped,
                failed = report.failed,
                "Repair sweep finished"
            );
        }
        report
    }

    /// Delivered orders still waiting for their external commit
    pub fn pending_commits(&self) -> SyncResult<u64> {
        Ok(self.storage.count_unsynced_deliveries()?)
    }

    // ========== Catalog reads ==========

    /// Products and couriers tabs, parsed
    pub async fn fetch_catalog(&self) -> SyncResult<SheetCatalog> {
        let products_tab = self.layout.products_tab();
        let rows = self.read_tab(&products_tab).await?;
        let products = parse_product_records(&products_tab, &rows)?;

        let couriers_tab = self.layout.couriers_tab();
        let rows = self.read_tab(&couriers_tab).await?;
        let couriers = parse_couriers(&couriers_tab, &rows)?;

        Ok(SheetCatalog { products, couriers })
    }

    /// Liquid price tiers for the configured city
    ///
    /// Reads the city's own price tab, falling back to the shared one. An
    /// empty result means the sheet has no prices for this city.
    pub async fn fetch_price_tiers(&self) -> SyncResult<Vec<(u32, f64)>> {
        let tabs = self
            .retry
            .run("list_tabs", || self.transport.list_tabs())
            .await?;
        let own = self.layout.prices_tab();
        let tab = if tabs.contains(&own) {
            own
        } else if tabs.iter().any(|t| t == PRICES_TAB) {
            PRICES_TAB.to_string()
        } else {
            tracing::debug!(tab = %own, "No price tab in sheet");
            return Ok(Vec::new());
        };

        let rows = self.read_tab(&tab).await?;
        parse_price_tiers(&tab, &rows, &self.layout.city)
    }
}
