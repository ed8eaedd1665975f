//! Spreadsheet layout: tab names, columns and keyed row lookup
//!
//! Rows are located through an index built from a single read of a tab.
//! Row numbers handed out here are 1-based sheet rows (header = row 1).

use super::{SyncError, SyncResult};
use shared::models::{Category, Courier};
use shared::order::{Order, OrderItem, OrderStatus};
use shared::util::millis_to_rfc3339;
use std::collections::HashMap;
use std::str::FromStr;

pub const PRODUCTS_TAB: &str = "products";
pub const COURIERS_TAB: &str = "couriers";
pub const ORDERS_TAB: &str = "orders";
/// Tiered liquid prices, optional
pub const PRICES_TAB: &str = "LiquidPrices";

/// Column order used when appending order rows
pub const ORDER_COLUMNS: [&str; 12] = [
    "order_id",
    "user_tg_id",
    "username",
    "city",
    "status",
    "items_json",
    "total",
    "courier_id",
    "slot_time",
    "created_at",
    "delivered_at",
    "sheets_committed",
];

/// Required product columns, each with its accepted aliases
pub const PRODUCT_COLUMNS: &[&[&str]] = &[
    &["product_id", "id", "sku"],
    &["stock", "qty_available"],
    &["active", "is_active"],
];

pub const COURIER_COLUMNS: &[&[&str]] = &[&["courier_id", "id"], &["name"]];

pub const ORDER_KEY_COLUMNS: &[&[&str]] = &[
    &["order_id"],
    &["status"],
    &["delivered_at"],
    &["sheets_committed"],
];

/// How tabs are split across cities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SheetMode {
    /// One tab per entity
    #[default]
    Single,
    /// One tab per entity and city, e.g. `orders_FFM`
    TabsPerCity,
}

impl FromStr for SheetMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(SheetMode::Single),
            "tabs_per_city" => Ok(SheetMode::TabsPerCity),
            other => Err(format!("unknown sheets mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub mode: SheetMode,
    pub city: String,
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self {
            mode: SheetMode::Single,
            city: "FFM".to_string(),
        }
    }
}

impl SheetLayout {
    pub fn tab(&self, base: &str) -> String {
        match self.mode {
            SheetMode::Single => base.to_string(),
            SheetMode::TabsPerCity => format!("{base}_{}", self.city),
        }
    }

    pub fn products_tab(&self) -> String {
        self.tab(PRODUCTS_TAB)
    }

    pub fn couriers_tab(&self) -> String {
        self.tab(COURIERS_TAB)
    }

    pub fn orders_tab(&self) -> String {
        self.tab(ORDERS_TAB)
    }

    pub fn prices_tab(&self) -> String {
        self.tab(PRICES_TAB)
    }
}

/// 0 → A, 25 → Z, 26 → AA
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Position of the first header matching any alias (case-insensitive)
pub fn find_column(header: &[String], aliases: &[&str]) -> Option<usize> {
    header.iter().position(|h| {
        let h = h.trim();
        aliases.iter().any(|a| h.eq_ignore_ascii_case(a))
    })
}

fn require_column(tab: &str, header: &[String], aliases: &[&str]) -> SyncResult<usize> {
    find_column(header, aliases).ok_or_else(|| SyncError::MissingColumn {
        tab: tab.to_string(),
        column: aliases.first().copied().unwrap_or_default().to_string(),
    })
}

/// Check a tab's header against required column groups
pub fn check_header(tab: &str, rows: &[Vec<String>], required: &[&[&str]]) -> SyncResult<()> {
    let header = rows.first().map(Vec::as_slice).unwrap_or_default();
    for aliases in required {
        require_column(tab, header, aliases)?;
    }
    Ok(())
}

/// Stable numeric id for a textual SKU (32-bit string hash, made non-negative)
pub fn sku_hash(sku: &str) -> u64 {
    let hash = sku
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)));
    u64::from(hash.unsigned_abs())
}

/// Product id from a sheet cell: numeric ids as-is, SKUs hashed
fn parse_product_id(cell: &str) -> Option<u64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    Some(cell.parse().unwrap_or_else(|_| sku_hash(cell)))
}

fn parse_stock(cell: &str) -> u32 {
    let value = cell.trim().replace(',', ".").parse::<f64>().unwrap_or(0.0);
    if value.is_finite() && value > 0.0 {
        value.floor().min(f64::from(u32::MAX)) as u32
    } else {
        0
    }
}

fn parse_bool(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

fn parse_number(cell: &str) -> Option<f64> {
    cell.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Non-empty trimmed cell of a row
fn cell(row: &[String], column: Option<usize>) -> Option<&str> {
    column
        .and_then(|c| row.get(c))
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
}

// ========== Catalog rows ==========

/// One product as listed in the products tab
///
/// Columns the tab does not carry stay `None` and leave the local value alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub id: u64,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub category: Option<Category>,
    pub brand: Option<String>,
    pub stock: u32,
    pub active: bool,
    pub upsell_group_id: Option<u64>,
}

/// Every product row of the products tab, header aliases resolved
pub fn parse_product_records(tab: &str, rows: &[Vec<String>]) -> SyncResult<Vec<ProductRecord>> {
    let header = rows.first().map(Vec::as_slice).unwrap_or_default();
    let id_column = require_column(tab, header, PRODUCT_COLUMNS[0])?;
    let stock_column = require_column(tab, header, &["stock", "qty_available", "qty"])?;
    let title = find_column(header, &["title", "name"]);
    let price = find_column(header, &["price"]);
    let category = find_column(header, &["category"]);
    let brand = find_column(header, &["brand"]);
    let upsell = find_column(header, &["upsell_group_id", "upsell"]);
    let active = find_column(header, PRODUCT_COLUMNS[2]);

    let mut seen = std::collections::HashSet::new();
    let mut records = Vec::new();
    for row in rows.iter().skip(1) {
        let Some(id) = row.get(id_column).and_then(|c| parse_product_id(c)) else {
            continue;
        };
        if !seen.insert(id) {
            continue;
        }
        records.push(ProductRecord {
            id,
            title: cell(row, title).map(str::to_string),
            price: cell(row, price).and_then(parse_number),
            category: cell(row, category).map(Category::parse),
            brand: cell(row, brand).map(str::to_string),
            stock: row.get(stock_column).map(|c| parse_stock(c)).unwrap_or(0),
            active: active.is_none_or(|c| row.get(c).is_some_and(|v| parse_bool(v))),
            upsell_group_id: cell(row, upsell).and_then(|c| c.parse().ok()),
        });
    }
    Ok(records)
}

/// Couriers of the couriers tab; rows without an id are skipped
pub fn parse_couriers(tab: &str, rows: &[Vec<String>]) -> SyncResult<Vec<Courier>> {
    let header = rows.first().map(Vec::as_slice).unwrap_or_default();
    let id_column = require_column(tab, header, COURIER_COLUMNS[0])?;
    let name = find_column(header, &["name"]);
    let chat = find_column(header, &["tg_id", "chat_id"]);
    let active = find_column(header, &["is_active", "active"]);
    let from = find_column(header, &["slot_from", "interval_start", "from_time", "time_from"]);
    let to = find_column(header, &["slot_to", "interval_end", "to_time", "time_to"]);

    let couriers = rows
        .iter()
        .skip(1)
        .filter_map(|row| {
            let id = row.get(id_column)?.trim().parse::<u64>().ok()?;
            let delivery_interval = match (cell(row, from), cell(row, to)) {
                (Some(from), Some(to)) => Some(format!("{from}-{to}")),
                _ => None,
            };
            Some(Courier {
                id,
                name: cell(row, name).unwrap_or("Courier").to_string(),
                chat_id: cell(row, chat).and_then(|c| c.parse().ok()),
                active: active.is_none_or(|c| row.get(c).is_some_and(|v| parse_bool(v))),
                delivery_interval,
            })
        })
        .collect();
    Ok(couriers)
}

/// `(min_quantity, unit_price)` rows of the price tab for one city
///
/// Rows with an empty city cell apply to every city. Returns an empty list when
/// the tab has no usable row for the city.
pub fn parse_price_tiers(tab: &str, rows: &[Vec<String>], city: &str) -> SyncResult<Vec<(u32, f64)>> {
    let header = rows.first().map(Vec::as_slice).unwrap_or_default();
    let from = require_column(tab, header, &["qty_from", "from"])?;
    let price = require_column(tab, header, &["price"])?;
    let city_column = find_column(header, &["city"]);

    let mut tiers: Vec<(u32, f64)> = rows
        .iter()
        .skip(1)
        .filter(|row| cell(row, city_column).is_none_or(|c| c.eq_ignore_ascii_case(city)))
        .filter_map(|row| {
            let min = cell(row, Some(from))?.parse::<u32>().ok().filter(|q| *q > 0)?;
            let unit = cell(row, Some(price)).and_then(parse_number).filter(|p| *p > 0.0)?;
            Some((min, unit))
        })
        .collect();
    tiers.sort_by_key(|(min, _)| *min);
    tiers.dedup_by_key(|(min, _)| *min);
    Ok(tiers)
}

// ========== Order rows ==========

/// Cells of an order row, in [`ORDER_COLUMNS`] order
pub fn order_row_cells(order: &Order, city: &str, status: OrderStatus, committed: bool) -> Vec<String> {
    let slot = order
        .delivery_slot
        .as_ref()
        .map(|s| match &s.exact_time {
            Some(exact) => format!("{} {exact}", s.interval),
            None => s.interval.clone(),
        })
        .unwrap_or_default();
    vec![
        order.id.to_string(),
        order.user_id.to_string(),
        String::new(),
        city.to_string(),
        status.as_str().to_string(),
        serde_json::to_string(&order.items).unwrap_or_default(),
        format!("{:.2}", order.totals.total_with_discount),
        order.courier_id.map(|c| c.to_string()).unwrap_or_default(),
        slot,
        millis_to_rfc3339(order.created_at),
        order.delivered_at.map(millis_to_rfc3339).unwrap_or_default(),
        if committed { "1" } else { "0" }.to_string(),
    ]
}

/// Orders tab indexed by order id
#[derive(Debug)]
pub struct OrderSheet {
    index: HashMap<u64, usize>,
    pub status_column: usize,
    pub delivered_at_column: usize,
    pub committed_column: usize,
}

impl OrderSheet {
    pub fn from_rows(tab: &str, rows: &[Vec<String>]) -> SyncResult<Self> {
        let header = rows.first().map(Vec::as_slice).unwrap_or_default();
        let key = require_column(tab, header, &["order_id"])?;
        let status_column = require_column(tab, header, &["status"])?;
        let delivered_at_column = require_column(tab, header, &["delivered_at"])?;
        let committed_column = require_column(tab, header, &["sheets_committed"])?;

        let mut index = HashMap::new();
        for (i, row) in rows.iter().enumerate().skip(1) {
            let Some(id) = row.get(key).and_then(|c| c.trim().parse::<u64>().ok()) else {
                continue;
            };
            // Duplicate appends are possible; the first row is the record
            index.entry(id).or_insert(i + 1);
        }

        Ok(Self {
            index,
            status_column,
            delivered_at_column,
            committed_column,
        })
    }

    /// Sheet row of an order
    pub fn locate(&self, order_id: u64) -> Option<usize> {
        self.index.get(&order_id).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// ========== Product stock ==========

/// One cell write produced by a stock decrement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockUpdate {
    pub product_id: u64,
    pub row: usize,
    pub stock_column: usize,
    pub new_stock: u32,
    /// Set when the product ran out and the tab has an active column
    pub deactivate_column: Option<usize>,
}

/// Products tab indexed by product id
#[derive(Debug)]
pub struct ProductSheet {
    /// product id → (sheet row, current stock)
    rows: HashMap<u64, (usize, u32)>,
    stock_column: usize,
    active_column: Option<usize>,
}

impl ProductSheet {
    pub fn from_rows(tab: &str, rows: &[Vec<String>]) -> SyncResult<Self> {
        let header = rows.first().map(Vec::as_slice).unwrap_or_default();
        let id_column = require_column(tab, header, PRODUCT_COLUMNS[0])?;
        let stock_column = require_column(tab, header, PRODUCT_COLUMNS[1])?;
        let active_column = find_column(header, PRODUCT_COLUMNS[2]);

        let mut index = HashMap::new();
        for (i, row) in rows.iter().enumerate().skip(1) {
            let Some(id) = row.get(id_column).and_then(|c| parse_product_id(c)) else {
                continue;
            };
            let stock = row.get(stock_column).map(|c| parse_stock(c)).unwrap_or(0);
            index.entry(id).or_insert((i + 1, stock));
        }

        Ok(Self {
            rows: index,
            stock_column,
            active_column,
        })
    }

    pub fn stock(&self, product_id: u64) -> Option<u32> {
        self.rows.get(&product_id).map(|(_, stock)| *stock)
    }

    /// Cell writes that subtract the delivered quantities, clamped at zero
    ///
    /// Also returns the ids of products missing from the tab.
    pub fn stock_updates(&self, items: &[OrderItem]) -> (Vec<StockUpdate>, Vec<u64>) {
        let mut totals: Vec<(u64, u32)> = Vec::new();
        for item in items {
            match totals.iter_mut().find(|(id, _)| *id == item.product_id) {
                Some((_, qty)) => *qty = qty.saturating_add(item.quantity),
                None => totals.push((item.product_id, item.quantity)),
            }
        }

        let mut updates = Vec::with_capacity(totals.len());
        let mut missing = Vec::new();
        for (product_id, quantity) in totals {
            let Some(&(row, stock)) = self.rows.get(&product_id) else {
                missing.push(product_id);
                continue;
            };
            let new_stock = stock.saturating_sub(quantity);
            updates.push(StockUpdate {
                product_id,
                row,
                stock_column: self.stock_column,
                new_stock,
                deactivate_column: if new_stock == 0 {
                    self.active_column
                } else {
                    None
                },
            });
        }
        (updates, missing)
    }
}
