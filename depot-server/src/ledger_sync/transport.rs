//! Transport to the spreadsheet that acts as the external ledger
//!
//! [`SheetTransport`] is the seam between the gateway and the network. The
//! HTTP implementation lives in `http.rs`; [`MemorySheetTransport`] keeps the
//! tabs in memory and can simulate an outage, which is what tests and
//! offline runs use.

use super::sheet::{ORDER_COLUMNS, SheetLayout};
use super::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared::models::{Courier, Product};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[async_trait]
pub trait SheetTransport: Send + Sync {
    /// Titles of all tabs in the spreadsheet
    async fn list_tabs(&self) -> SyncResult<Vec<String>>;

    /// Every row of a tab, header first
    async fn read_rows(&self, tab: &str) -> SyncResult<Vec<Vec<String>>>;

    async fn append_rows(&self, tab: &str, rows: Vec<Vec<String>>) -> SyncResult<()>;

    /// Overwrite consecutive cells of one row
    ///
    /// `row` is 1-based like A1 notation (the header is row 1), `column` is
    /// 0-based.
    async fn update_cells(
        &self,
        tab: &str,
        row: usize,
        column: usize,
        values: Vec<String>,
    ) -> SyncResult<()>;
}

/// In-memory spreadsheet with failure injection
#[derive(Debug, Default)]
pub struct MemorySheetTransport {
    tabs: Mutex<BTreeMap<String, Vec<Vec<String>>>>,
    offline: AtomicBool,
    fail_next: AtomicU32,
    writes: AtomicU64,
}

impl MemorySheetTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or reset) a tab holding only its header row
    pub fn add_tab(&self, name: &str, header: &[&str]) {
        self.tabs.lock().insert(
            name.to_string(),
            vec![header.iter().map(|h| h.to_string()).collect()],
        );
    }

    /// Spreadsheet with the three standard tabs filled from the local catalog
    pub fn with_catalog(layout: &SheetLayout, products: &[Product], couriers: &[Courier]) -> Self {
        let sheet = Self::new();
        let products_tab = layout.products_tab();
        let couriers_tab = layout.couriers_tab();
        sheet.add_tab(&products_tab, &["product_id", "title", "stock", "active"]);
        sheet.add_tab(&couriers_tab, &["courier_id", "name"]);
        sheet.add_tab(&layout.orders_tab(), &ORDER_COLUMNS);
        for p in products {
            sheet.insert_row(
                &products_tab,
                vec![
                    p.id.to_string(),
                    p.title.clone(),
                    p.available.to_string(),
                    if p.active { "TRUE" } else { "FALSE" }.to_string(),
                ],
            );
        }
        for c in couriers {
            sheet.insert_row(&couriers_tab, vec![c.id.to_string(), c.name.clone()]);
        }
        sheet
    }

    /// Put a data row directly, bypassing failure injection and counters
    pub fn insert_row(&self, tab: &str, row: Vec<String>) {
        self.tabs.lock().entry(tab.to_string()).or_default().push(row);
    }

    /// Every call fails while offline
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `count` calls, then recover
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    pub fn rows(&self, tab: &str) -> Vec<Vec<String>> {
        self.tabs.lock().get(tab).cloned().unwrap_or_default()
    }

    /// Successful appends and updates so far
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> SyncResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::Unavailable("sheet is offline".into()));
        }
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SheetTransport for MemorySheetTransport {
    async fn list_tabs(&self) -> SyncResult<Vec<String>> {
        self.check_available()?;
        Ok(self.tabs.lock().keys().cloned().collect())
    }

    async fn read_rows(&self, tab: &str) -> SyncResult<Vec<Vec<String>>> {
        self.check_available()?;
        self.tabs
            .lock()
            .get(tab)
            .cloned()
            .ok_or_else(|| SyncError::TabNotFound(tab.to_string()))
    }

    async fn append_rows(&self, tab: &str, rows: Vec<Vec<String>>) -> SyncResult<()> {
        self.check_available()?;
        let mut tabs = self.tabs.lock();
        let sheet = tabs
            .get_mut(tab)
            .ok_or_else(|| SyncError::TabNotFound(tab.to_string()))?;
        sheet.extend(rows);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_cells(
        &self,
        tab: &str,
        row: usize,
        column: usize,
        values: Vec<String>,
    ) -> SyncResult<()> {
        self.check_available()?;
        if row == 0 {
            return Err(SyncError::Api {
                status: 400,
                body: "row numbers start at 1".into(),
            });
        }
        let mut tabs = self.tabs.lock();
        let sheet = tabs
            .get_mut(tab)
            .ok_or_else(|| SyncError::TabNotFound(tab.to_string()))?;
        if sheet.len() < row {
            sheet.resize_with(row, Vec::new);
        }
        let cells = &mut sheet[row - 1];
        if cells.len() < column + values.len() {
            cells.resize(column + values.len(), String::new());
        }
        for (offset, value) in values.into_iter().enumerate() {
            cells[column + offset] = value;
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
