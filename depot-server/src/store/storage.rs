//! redb-based durable store
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `products` | `product_id` | `Product` | Catalog, owns `available` |
//! | `couriers` | `courier_id` | `Courier` | Courier directory |
//! | `customers` | `user_id` | `CustomerProfile` | Segment and reminder date per customer |
//! | `orders` | `order_id` | `Order` | Order records |
//! | `reservations` | `(order_id, product_id)` | `Reservation` | Stock holds |
//! | `active_orders` | `order_id` | `()` | Non-terminal order index |
//! | `unsynced_deliveries` | `order_id` | `()` | Delivered, external commit outstanding |
//! | `unsynced_cancellations` | `order_id` | `()` | Published then cancelled, external row outstanding |
//! | `stock_commits` | `(order_id, product_id)` | `()` | External stock decrements that landed |
//! | `sequence_counter` | `&str` | `u64` | Order id sequence |
//!
//! The three index tables are maintained by [`DepotStorage::put_order_txn`], so
//! every order write keeps them in step with the order's status and sync flag.

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition,
    WriteTransaction,
};
use chrono::NaiveDate;
use shared::models::{Courier, CustomerProfile, CustomerSegment, Product};
use shared::order::{Order, OrderStatus, Reservation};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const PRODUCTS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("products");

const COURIERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("couriers");

const CUSTOMERS_TABLE: TableDefinition<i64, &[u8]> = TableDefinition::new("customers");

const ORDERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("orders");

/// key = (order_id, product_id), one row per distinct product of an order
const RESERVATIONS_TABLE: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("reservations");

const ACTIVE_ORDERS_TABLE: TableDefinition<u64, ()> = TableDefinition::new("active_orders");

const UNSYNCED_DELIVERIES_TABLE: TableDefinition<u64, ()> =
    TableDefinition::new("unsynced_deliveries");

const UNSYNCED_CANCELLATIONS_TABLE: TableDefinition<u64, ()> =
    TableDefinition::new("unsynced_cancellations");

/// key = (order_id, product_id); cleared when the order's flag flips
const STOCK_COMMITS_TABLE: TableDefinition<(u64, u64), ()> = TableDefinition::new("stock_commits");

const SEQUENCE_TABLE: TableDefinition<&str, u64> = TableDefinition::new("sequence_counter");

const ORDER_ID_KEY: &str = "order_id";

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(u64),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Row counts, for startup logging and observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub products: u64,
    pub couriers: u64,
    pub orders: u64,
    pub active_orders: u64,
    pub reservations: u64,
    pub unsynced_deliveries: u64,
    pub unsynced_cancellations: u64,
}

/// Durable store backed by redb
#[derive(Clone)]
pub struct DepotStorage {
    db: Arc<Database>,
}

impl DepotStorage {
    /// Open or create the database at the given path
    ///
    /// redb commits are durable once `commit()` returns (copy-on-write with an
    /// atomic root swap), so a crash never leaves a half-applied transaction.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// Open an in-memory database (tests and offline runs)
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PRODUCTS_TABLE)?;
            let _ = write_txn.open_table(COURIERS_TABLE)?;
            let _ = write_txn.open_table(CUSTOMERS_TABLE)?;
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(RESERVATIONS_TABLE)?;
            let _ = write_txn.open_table(ACTIVE_ORDERS_TABLE)?;
            let _ = write_txn.open_table(UNSYNCED_DELIVERIES_TABLE)?;
            let _ = write_txn.open_table(UNSYNCED_CANCELLATIONS_TABLE)?;
            let _ = write_txn.open_table(STOCK_COMMITS_TABLE)?;

            let mut seq_table = write_txn.open_table(SEQUENCE_TABLE)?;
            if seq_table.get(ORDER_ID_KEY)?.is_none() {
                seq_table.insert(ORDER_ID_KEY, 0u64)?;
            }
        }
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Begin a write transaction
    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Sequence ==========

    /// Allocate the next order id (within transaction)
    pub fn next_order_id(&self, txn: &WriteTransaction) -> StorageResult<u64> {
        let mut table = txn.open_table(SEQUENCE_TABLE)?;
        let current = table
            .get(ORDER_ID_KEY)?
            .map(|guard| guard.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(ORDER_ID_KEY, next)?;
        Ok(next)
    }

    /// Last allocated order id (read-only)
    pub fn current_order_id(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(SEQUENCE_TABLE)?;
        Ok(table
            .get(ORDER_ID_KEY)?
            .map(|guard| guard.value())
            .unwrap_or(0))
    }

    // ========== Products ==========

    pub fn put_product_txn(&self, txn: &WriteTransaction, product: &Product) -> StorageResult<()> {
        let mut table = txn.open_table(PRODUCTS_TABLE)?;
        let value = serde_json::to_vec(product)?;
        table.insert(product.id, value.as_slice())?;
        Ok(())
    }

    pub fn put_product(&self, product: &Product) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        self.put_product_txn(&txn, product)?;
        txn.commit()?;
        Ok(())
    }

    pub fn get_product(&self, product_id: u64) -> StorageResult<Option<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS_TABLE)?;
        match table.get(product_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_product_txn(
        &self,
        txn: &WriteTransaction,
        product_id: u64,
    ) -> StorageResult<Option<Product>> {
        let table = txn.open_table(PRODUCTS_TABLE)?;
        match table.get(product_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_products(&self) -> StorageResult<Vec<Product>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRODUCTS_TABLE)?;

        let mut products = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            products.push(serde_json::from_slice(value.value())?);
        }
        Ok(products)
    }

    // ========== Couriers ==========

    pub fn put_courier(&self, courier: &Courier) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(COURIERS_TABLE)?;
            let value = serde_json::to_vec(courier)?;
            table.insert(courier.id, value.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_courier(&self, courier_id: u64) -> StorageResult<Option<Courier>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COURIERS_TABLE)?;
        match table.get(courier_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_couriers(&self) -> StorageResult<Vec<Courier>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COURIERS_TABLE)?;

        let mut couriers = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            couriers.push(serde_json::from_slice(value.value())?);
        }
        Ok(couriers)
    }

    // ========== Customers ==========

    /// Profile of a customer, default when never stored
    pub fn get_customer(&self, user_id: i64) -> StorageResult<CustomerProfile> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CUSTOMERS_TABLE)?;
        match table.get(user_id)? {
            Some(value) => Ok(serde_json::from_slice(value.value())?),
            None => Ok(CustomerProfile::default()),
        }
    }

    /// Segment of a customer, `Regular` when never set
    pub fn get_customer_segment(&self, user_id: i64) -> StorageResult<CustomerSegment> {
        Ok(self.get_customer(user_id)?.segment)
    }

    /// Read-modify-write of a customer profile in its own transaction
    pub fn update_customer(
        &self,
        user_id: i64,
        f: impl FnOnce(&mut CustomerProfile),
    ) -> StorageResult<CustomerProfile> {
        let txn = self.db.begin_write()?;
        let profile = {
            let mut table = txn.open_table(CUSTOMERS_TABLE)?;
            let mut profile: CustomerProfile = match table.get(user_id)? {
                Some(value) => serde_json::from_slice(value.value())?,
                None => CustomerProfile::default(),
            };
            f(&mut profile);
            let value = serde_json::to_vec(&profile)?;
            table.insert(user_id, value.as_slice())?;
            profile
        };
        txn.commit()?;
        Ok(profile)
    }

    pub fn set_customer_segment(
        &self,
        user_id: i64,
        segment: CustomerSegment,
    ) -> StorageResult<()> {
        self.update_customer(user_id, |profile| profile.segment = segment)?;
        Ok(())
    }

    /// Customers whose reminder date is on or before `today` (full scan)
    pub fn list_due_reminders(&self, today: NaiveDate) -> StorageResult<Vec<i64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CUSTOMERS_TABLE)?;

        let mut due = Vec::new();
        for result in table.iter()? {
            let (key, value) = result?;
            let profile: CustomerProfile = serde_json::from_slice(value.value())?;
            if profile.reminder_due(today) {
                due.push(key.value());
            }
        }
        Ok(due)
    }

    // ========== Orders ==========

    /// Store an order and keep the index tables in step with it
    pub fn put_order_txn(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        {
            let mut table = txn.open_table(ORDERS_TABLE)?;
            let value = serde_json::to_vec(order)?;
            table.insert(order.id, value.as_slice())?;
        }

        let mut active = txn.open_table(ACTIVE_ORDERS_TABLE)?;
        if order.status.is_terminal() {
            active.remove(order.id)?;
        } else {
            active.insert(order.id, ())?;
        }

        let mut unsynced = txn.open_table(UNSYNCED_DELIVERIES_TABLE)?;
        if order.status == OrderStatus::Delivered && !order.external_sync_committed {
            unsynced.insert(order.id, ())?;
        } else {
            unsynced.remove(order.id)?;
        }

        let mut cancellations = txn.open_table(UNSYNCED_CANCELLATIONS_TABLE)?;
        if order.needs_cancel_sync() {
            cancellations.insert(order.id, ())?;
        } else {
            cancellations.remove(order.id)?;
        }
        Ok(())
    }

    pub fn get_order(&self, order_id: u64) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: u64,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of a single order in its own transaction
    ///
    /// The closure sees the current record and may refuse by returning an
    /// error, in which case nothing is written.
    pub fn update_order<E>(
        &self,
        order_id: u64,
        f: impl FnOnce(&mut Order) -> Result<(), E>,
    ) -> Result<Order, E>
    where
        E: From<StorageError>,
    {
        let txn = self.begin_write()?;
        let mut order = self
            .get_order_txn(&txn, order_id)?
            .ok_or(StorageError::OrderNotFound(order_id))?;
        if let Err(e) = f(&mut order) {
            txn.abort().map_err(StorageError::from)?;
            return Err(e);
        }
        self.put_order_txn(&txn, &order)?;
        txn.commit().map_err(StorageError::from)?;
        Ok(order)
    }

    /// Delete an order, its reservation rows and index entries
    pub fn remove_order_txn(&self, txn: &WriteTransaction, order_id: u64) -> StorageResult<()> {
        let mut table = txn.open_table(ORDERS_TABLE)?;
        table.remove(order_id)?;

        let mut active = txn.open_table(ACTIVE_ORDERS_TABLE)?;
        active.remove(order_id)?;
        let mut unsynced = txn.open_table(UNSYNCED_DELIVERIES_TABLE)?;
        unsynced.remove(order_id)?;
        let mut cancellations = txn.open_table(UNSYNCED_CANCELLATIONS_TABLE)?;
        cancellations.remove(order_id)?;
        clear_stock_commits(txn, order_id)?;

        let mut reservations = txn.open_table(RESERVATIONS_TABLE)?;
        let keys: Vec<(u64, u64)> = reservations
            .range((order_id, 0u64)..=(order_id, u64::MAX))?
            .map(|r| r.map(|(k, _)| k.value()))
            .collect::<Result<_, _>>()?;
        for key in keys {
            reservations.remove(key)?;
        }
        Ok(())
    }

    /// All orders matching a predicate (full scan)
    pub fn list_orders_where(&self, pred: impl Fn(&Order) -> bool) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;

        let mut orders = Vec::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let order: Order = serde_json::from_slice(value.value())?;
            if pred(&order) {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    /// All non-terminal orders, via the active index
    pub fn list_active_orders(&self) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let active = read_txn.open_table(ACTIVE_ORDERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in active.iter()? {
            let (key, _) = entry?;
            if let Some(value) = orders.get(key.value())? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(result)
    }

    /// Delivered orders whose external commit has not landed yet
    pub fn list_unsynced_deliveries(&self) -> StorageResult<Vec<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UNSYNCED_DELIVERIES_TABLE)?;

        let mut ids = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            ids.push(key.value());
        }
        Ok(ids)
    }

    pub fn count_unsynced_deliveries(&self) -> StorageResult<u64> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UNSYNCED_DELIVERIES_TABLE)?;
        Ok(table.len()?)
    }

    /// Published orders whose cancellation has not reached the external ledger
    pub fn list_unsynced_cancellations(&self) -> StorageResult<Vec<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(UNSYNCED_CANCELLATIONS_TABLE)?;

        let mut ids = Vec::new();
        for result in table.iter()? {
            let (key, _) = result?;
            ids.push(key.value());
        }
        Ok(ids)
    }

    /// Products of an order whose external stock decrement already landed
    pub fn stock_commits(&self, order_id: u64) -> StorageResult<BTreeSet<u64>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(STOCK_COMMITS_TABLE)?;

        let mut done = BTreeSet::new();
        for result in table.range((order_id, 0u64)..=(order_id, u64::MAX))? {
            let (key, _) = result?;
            done.insert(key.value().1);
        }
        Ok(done)
    }

    pub fn record_stock_commit(&self, order_id: u64, product_id: u64) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(STOCK_COMMITS_TABLE)?;
            table.insert((order_id, product_id), ())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Flip the external-sync flag
    ///
    /// Returns `false` when the flag was already set, so concurrent callers
    /// can tell who actually committed.
    pub fn mark_external_synced(&self, order_id: u64) -> StorageResult<bool> {
        let txn = self.db.begin_write()?;
        let Some(mut order) = self.get_order_txn(&txn, order_id)? else {
            txn.abort()?;
            return Err(StorageError::OrderNotFound(order_id));
        };
        if order.external_sync_committed {
            txn.abort()?;
            return Ok(false);
        }
        order.external_sync_committed = true;
        self.put_order_txn(&txn, &order)?;
        clear_stock_commits(&txn, order_id)?;
        txn.commit()?;
        Ok(true)
    }

    // ========== Reservations ==========

    pub fn put_reservation_txn(
        &self,
        txn: &WriteTransaction,
        reservation: &Reservation,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(RESERVATIONS_TABLE)?;
        let value = serde_json::to_vec(reservation)?;
        table.insert(
            (reservation.order_id, reservation.product_id),
            value.as_slice(),
        )?;
        Ok(())
    }

    pub fn get_reservation_txn(
        &self,
        txn: &WriteTransaction,
        order_id: u64,
        product_id: u64,
    ) -> StorageResult<Option<Reservation>> {
        let table = txn.open_table(RESERVATIONS_TABLE)?;
        match table.get((order_id, product_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    /// All reservation rows of an order (within transaction)
    pub fn reservations_for_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: u64,
    ) -> StorageResult<Vec<Reservation>> {
        let table = txn.open_table(RESERVATIONS_TABLE)?;
        let mut rows = Vec::new();
        for result in table.range((order_id, 0u64)..=(order_id, u64::MAX))? {
            let (_key, value) = result?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }

    pub fn reservations_for_order(&self, order_id: u64) -> StorageResult<Vec<Reservation>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESERVATIONS_TABLE)?;
        let mut rows = Vec::new();
        for result in table.range((order_id, 0u64)..=(order_id, u64::MAX))? {
            let (_key, value) = result?;
            rows.push(serde_json::from_slice(value.value())?);
        }
        Ok(rows)
    }

    /// Sum of active (non-released, non-expired) reservations per product
    pub fn active_reservation_totals(&self, now: i64) -> StorageResult<HashMap<u64, u32>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RESERVATIONS_TABLE)?;

        let mut totals: HashMap<u64, u32> = HashMap::new();
        for result in table.iter()? {
            let (_key, value) = result?;
            let row: Reservation = serde_json::from_slice(value.value())?;
            if row.is_active_at(now) {
                let entry = totals.entry(row.product_id).or_insert(0);
                *entry = entry.saturating_add(row.quantity);
            }
        }
        Ok(totals)
    }

    // ========== Stats ==========

    pub fn get_stats(&self) -> StorageResult<StorageStats> {
        let read_txn = self.db.begin_read()?;
        Ok(StorageStats {
            products: read_txn.open_table(PRODUCTS_TABLE)?.len()?,
            couriers: read_txn.open_table(COURIERS_TABLE)?.len()?,
            orders: read_txn.open_table(ORDERS_TABLE)?.len()?,
            active_orders: read_txn.open_table(ACTIVE_ORDERS_TABLE)?.len()?,
            reservations: read_txn.open_table(RESERVATIONS_TABLE)?.len()?,
            unsynced_deliveries: read_txn.open_table(UNSYNCED_DELIVERIES_TABLE)?.len()?,
            unsynced_cancellations: read_txn.open_table(UNSYNCED_CANCELLATIONS_TABLE)?.len()?,
        })
    }
}

fn clear_stock_commits(txn: &WriteTransaction, order_id: u64) -> StorageResult<()> {
    let mut table = txn.open_table(STOCK_COMMITS_TABLE)?;
    let keys: Vec<(u64, u64)> = table
        .range((order_id, 0u64)..=(order_id, u64::MAX))?
        .map(|r| r.map(|(k, _)| k.value()))
        .collect::<Result<_, _>>()?;
    for key in keys {
        table.remove(key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::Category;
    use shared::order::{OrderItem, OrderSource, Totals};

    fn create_test_product(id: u64, available: u32) -> Product {
        Product {
            id,
            title: format!("Product {id}"),
            price: 18.0,
            category: Category::Liquids,
            brand: None,
            available,
            active: true,
            upsell_group_id: None,
        }
    }

    fn create_test_order(id: u64, status: OrderStatus) -> Order {
        Order {
            id,
            user_id: 42,
            items: vec![OrderItem::at_list_price(1, 2, 18.0)],
            totals: Totals::default(),
            status,
            created_at: 1_000,
            updated_at: 1_000,
            expires_at: 10_000,
            courier_id: None,
            delivery_slot: None,
            payment_method: None,
            source: OrderSource::Normal,
            delivered_at: None,
            published: false,
            external_sync_committed: false,
        }
    }

    fn put_order(storage: &DepotStorage, order: &Order) {
        let txn = storage.begin_write().unwrap();
        storage.put_order_txn(&txn, order).unwrap();
        txn.commit().unwrap();
    }

    #[test]
    fn test_order_id_sequence() {
        let storage = DepotStorage::open_in_memory().unwrap();

        let txn = storage.begin_write().unwrap();
        assert_eq!(storage.next_order_id(&txn).unwrap(), 1);
        assert_eq!(storage.next_order_id(&txn).unwrap(), 2);
        txn.commit().unwrap();

        assert_eq!(storage.current_order_id().unwrap(), 2);
    }

    #[test]
    fn test_aborted_sequence_is_not_persisted() {
        let storage = DepotStorage::open_in_memory().unwrap();

        let txn = storage.begin_write().unwrap();
        storage.next_order_id(&txn).unwrap();
        txn.abort().unwrap();

        assert_eq!(storage.current_order_id().unwrap(), 0);
    }

    #[test]
    fn test_product_roundtrip() {
        let storage = DepotStorage::open_in_memory().unwrap();
        storage.put_product(&create_test_product(7, 3)).unwrap();

        let loaded = storage.get_product(7).unwrap().unwrap();
        assert_eq!(loaded.available, 3);
        assert!(storage.get_product(8).unwrap().is_none());
        assert_eq!(storage.list_products().unwrap().len(), 1);
    }

    #[test]
    fn test_customer_segment_defaults_to_regular() {
        let storage = DepotStorage::open_in_memory().unwrap();
        assert_eq!(
            storage.get_customer_segment(5).unwrap(),
            CustomerSegment::Regular
        );

        storage.set_customer_segment(5, CustomerSegment::Sale10).unwrap();
        assert_eq!(
            storage.get_customer_segment(5).unwrap(),
            CustomerSegment::Sale10
        );
    }

    #[test]
    fn test_indices_follow_order_status() {
        let storage = DepotStorage::open_in_memory().unwrap();

        let mut order = create_test_order(1, OrderStatus::Buffer);
        put_order(&storage, &order);
        assert_eq!(storage.list_active_orders().unwrap().len(), 1);
        assert!(storage.list_unsynced_deliveries().unwrap().is_empty());

        order.status = OrderStatus::Delivered;
        put_order(&storage, &order);
        assert!(storage.list_active_orders().unwrap().is_empty());
        assert_eq!(storage.list_unsynced_deliveries().unwrap(), vec![1]);

        assert!(storage.mark_external_synced(1).unwrap());
        assert!(!storage.mark_external_synced(1).unwrap());
        assert_eq!(storage.count_unsynced_deliveries().unwrap(), 0);
        assert!(storage.get_order(1).unwrap().unwrap().external_sync_committed);
    }

    #[test]
    fn test_update_order_refusal_writes_nothing() {
        let storage = DepotStorage::open_in_memory().unwrap();
        put_order(&storage, &create_test_order(1, OrderStatus::Pending));

        let result: Result<Order, StorageError> = storage.update_order(1, |order| {
            order.status = OrderStatus::Cancelled;
            Err(StorageError::OrderNotFound(999))
        });
        assert!(result.is_err());
        assert_eq!(
            storage.get_order(1).unwrap().unwrap().status,
            OrderStatus::Pending
        );

        let missing: Result<Order, StorageError> = storage.update_order(2, |_| Ok(()));
        assert!(matches!(missing, Err(StorageError::OrderNotFound(2))));
    }

    #[test]
    fn test_active_reservation_totals_skip_released_and_expired() {
        let storage = DepotStorage::open_in_memory().unwrap();
        let txn = storage.begin_write().unwrap();
        let rows = [
            (1, 10, 2, 5_000, false),
            (2, 10, 1, 5_000, false),
            (3, 10, 4, 5_000, true),
            (4, 10, 8, 1_500, false),
            (4, 11, 1, i64::MAX, false),
        ];
        for (order_id, product_id, quantity, expires_at, released) in rows {
            storage
                .put_reservation_txn(
                    &txn,
                    &Reservation {
                        order_id,
                        product_id,
                        quantity,
                        created_at: 1_000,
                        expires_at,
                        released,
                    },
                )
                .unwrap();
        }
        txn.commit().unwrap();

        let totals = storage.active_reservation_totals(2_000).unwrap();
        assert_eq!(totals.get(&10), Some(&3));
        assert_eq!(totals.get(&11), Some(&1));
        assert_eq!(storage.reservations_for_order(4).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_order_drops_reservations() {
        let storage = DepotStorage::open_in_memory().unwrap();
        put_order(&storage, &create_test_order(3, OrderStatus::NotIssued));

        let txn = storage.begin_write().unwrap();
        storage
            .put_reservation_txn(
                &txn,
                &Reservation {
                    order_id: 3,
                    product_id: 1,
                    quantity: 2,
                    created_at: 0,
                    expires_at: 10,
                    released: true,
                },
            )
            .unwrap();
        txn.commit().unwrap();

        let txn = storage.begin_write().unwrap();
        storage.remove_order_txn(&txn, 3).unwrap();
        txn.commit().unwrap();

        assert!(storage.get_order(3).unwrap().is_none());
        assert!(storage.reservations_for_order(3).unwrap().is_empty());
        assert_eq!(storage.get_stats().unwrap().orders, 0);
    }

    #[test]
    fn test_reopen_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depot.redb");
        {
            let storage = DepotStorage::open(&path).unwrap();
            storage.put_product(&create_test_product(1, 9)).unwrap();
            put_order(&storage, &create_test_order(1, OrderStatus::Pending));
        }

        let storage = DepotStorage::open(&path).unwrap();
        assert_eq!(storage.get_product(1).unwrap().unwrap().available, 9);
        assert_eq!(storage.list_active_orders().unwrap().len(), 1);
    }

    #[test]
    fn test_cancellation_index_tracks_published_orders() {
        let storage = DepotStorage::open_in_memory().unwrap();

        // Never published: nothing to rewrite externally
        put_order(&storage, &create_test_order(1, OrderStatus::Cancelled));
        assert!(storage.list_unsynced_cancellations().unwrap().is_empty());

        let mut order = create_test_order(2, OrderStatus::Pending);
        order.published = true;
        put_order(&storage, &order);
        assert!(storage.list_unsynced_cancellations().unwrap().is_empty());

        order.status = OrderStatus::Cancelled;
        put_order(&storage, &order);
        assert_eq!(storage.list_unsynced_cancellations().unwrap(), vec![2]);
        assert_eq!(storage.get_stats().unwrap().unsynced_cancellations, 1);

        assert!(storage.mark_external_synced(2).unwrap());
        assert!(storage.list_unsynced_cancellations().unwrap().is_empty());
        assert!(storage.list_unsynced_deliveries().unwrap().is_empty());
    }

    #[test]
    fn test_stock_commits_cleared_with_flag() {
        let storage = DepotStorage::open_in_memory().unwrap();
        put_order(&storage, &create_test_order(4, OrderStatus::Delivered));

        storage.record_stock_commit(4, 1).unwrap();
        storage.record_stock_commit(4, 3).unwrap();
        storage.record_stock_commit(5, 1).unwrap();
        assert_eq!(
            storage.stock_commits(4).unwrap().into_iter().collect::<Vec<_>>(),
            vec![1, 3]
        );

        assert!(storage.mark_external_synced(4).unwrap());
        assert!(storage.stock_commits(4).unwrap().is_empty());
        assert_eq!(storage.stock_commits(5).unwrap().len(), 1);
    }

    #[test]
    fn test_due_reminders() {
        let storage = DepotStorage::open_in_memory().unwrap();
        let today = NaiveDate::from_ymd_opt(2026, 5, 4).unwrap();

        storage
            .update_customer(1, |p| p.next_reminder = today.pred_opt())
            .unwrap();
        storage
            .update_customer(2, |p| p.next_reminder = Some(today))
            .unwrap();
        storage
            .update_customer(3, |p| p.next_reminder = today.succ_opt())
            .unwrap();
        storage.set_customer_segment(4, CustomerSegment::Sale10).unwrap();

        let mut due = storage.list_due_reminders(today).unwrap();
        due.sort();
        assert_eq!(due, vec![1, 2]);

        // Segment updates keep the schedule
        storage.set_customer_segment(3, CustomerSegment::Sale10).unwrap();
        assert_eq!(storage.get_customer(3).unwrap().next_reminder, today.succ_opt());
    }
}
