//! Reservation counters and the ledger critical section
//!
//! Every mutation of the counters goes through [`ReservationLedger::transact`]:
//! one mutex guards the counters for the whole span of one redb write
//! transaction, and the deltas collected inside are applied to the counters
//! only after the commit succeeded. A failed closure aborts the transaction
//! and leaves the counters untouched.
//!
//! The closure is synchronous. Nothing inside may await.

use super::{LedgerError, LedgerResult};
use crate::store::DepotStorage;
use parking_lot::Mutex;
use redb::WriteTransaction;
use shared::order::{OrderItem, Reservation};
use shared::util::now_millis;
use std::collections::{BTreeMap, HashMap};

/// Sum quantities per product, keeping first-appearance order
fn aggregate(items: &[OrderItem]) -> Vec<(u64, u32)> {
    let mut out: Vec<(u64, u32)> = Vec::with_capacity(items.len());
    for item in items {
        match out.iter_mut().find(|(pid, _)| *pid == item.product_id) {
            Some((_, qty)) => *qty = qty.saturating_add(item.quantity),
            None => out.push((item.product_id, item.quantity)),
        }
    }
    out
}

struct Counters {
    reserved: HashMap<u64, u32>,
    /// Rows that had expired at this instant were left out of the last rebuild
    restored_at: i64,
}

impl Counters {
    fn get(&self, product_id: u64) -> u32 {
        self.reserved.get(&product_id).copied().unwrap_or(0)
    }

    fn apply(&mut self, deltas: HashMap<u64, i64>) {
        for (product_id, delta) in deltas {
            let next = (i64::from(self.get(product_id)) + delta).max(0);
            if next == 0 {
                self.reserved.remove(&product_id);
            } else {
                self.reserved
                    .insert(product_id, u32::try_from(next).unwrap_or(u32::MAX));
            }
        }
    }
}

/// Stock holds of not-yet-finalized orders
pub struct ReservationLedger {
    storage: DepotStorage,
    counters: Mutex<Counters>,
}

impl std::fmt::Debug for ReservationLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationLedger")
            .field("products_held", &self.counters.lock().reserved.len())
            .finish()
    }
}

impl ReservationLedger {
    pub fn new(storage: DepotStorage) -> Self {
        Self {
            storage,
            counters: Mutex::new(Counters {
                reserved: HashMap::new(),
                restored_at: i64::MIN,
            }),
        }
    }

    pub fn storage(&self) -> &DepotStorage {
        &self.storage
    }

    /// Run `f` inside the ledger critical section
    ///
    /// Store writes made through [`HoldTxn::txn`] and counter changes made
    /// through the hold methods land together or not at all.
    pub fn transact<T, E>(&self, f: impl FnOnce(&mut HoldTxn<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let mut counters = self.counters.lock();
        let txn = self.storage.begin_write().map_err(LedgerError::from)?;
        let mut hold = HoldTxn {
            storage: &self.storage,
            txn,
            counters: &*counters,
            deltas: HashMap::new(),
        };

        let result = f(&mut hold);
        let HoldTxn { txn, deltas, .. } = hold;

        match result {
            Ok(value) => {
                txn.commit().map_err(LedgerError::from)?;
                counters.apply(deltas);
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = txn.abort() {
                    tracing::error!(error = %abort_err, "Failed to abort ledger transaction");
                }
                Err(e)
            }
        }
    }

    /// Rebuild counters from non-released, non-expired reservation rows
    pub fn restore_reservations(&self) -> LedgerResult<usize> {
        let mut counters = self.counters.lock();
        let now = now_millis();
        let totals = self.storage.active_reservation_totals(now)?;
        let units: u64 = totals.values().map(|q| u64::from(*q)).sum();
        let products = totals.len();

        counters.reserved = totals;
        counters.restored_at = now;

        tracing::info!(products, units, "Reservation counters restored");
        Ok(products)
    }

    /// `available - reserved >= quantity`; false for unknown or inactive products
    pub fn validate_stock(&self, product_id: u64, quantity: u32) -> LedgerResult<bool> {
        let Some(product) = self.storage.get_product(product_id)? else {
            return Ok(false);
        };
        if !product.active {
            return Ok(false);
        }
        let reserved = self.counters.lock().get(product_id);
        Ok(product.available.saturating_sub(reserved) >= quantity)
    }

    /// All-or-nothing hold for an order's items
    pub fn reserve(&self, order_id: u64, items: &[OrderItem], expires_at: i64) -> LedgerResult<()> {
        let now = now_millis();
        self.transact(|hold| hold.reserve(order_id, items, now, expires_at))
    }

    /// Release an order's active holds; repeat calls release nothing
    pub fn release(&self, order_id: u64, items: &[OrderItem]) -> LedgerResult<u32> {
        self.transact(|hold| hold.release(order_id, items))
    }

    /// Subtract delivered quantities from catalog stock
    pub fn final_deduction(&self, items: &[OrderItem]) -> LedgerResult<()> {
        self.transact(|hold| hold.final_deduction(items))
    }

    /// Currently reserved quantity of a product
    pub fn reserved(&self, product_id: u64) -> u32 {
        self.counters.lock().get(product_id)
    }

    /// Read-only copy of all non-zero counters
    pub fn snapshot(&self) -> BTreeMap<u64, u32> {
        self.counters
            .lock()
            .reserved
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }
}

/// Handle passed to [`ReservationLedger::transact`] closures
pub struct HoldTxn<'a> {
    storage: &'a DepotStorage,
    txn: WriteTransaction,
    counters: &'a Counters,
    deltas: HashMap<u64, i64>,
}

impl HoldTxn<'_> {
    pub fn storage(&self) -> &DepotStorage {
        self.storage
    }

    /// The write transaction backing this critical section
    pub fn txn(&self) -> &WriteTransaction {
        &self.txn
    }

    /// Reserved quantity including changes staged in this transaction
    pub fn reserved(&self, product_id: u64) -> u32 {
        let staged = self.deltas.get(&product_id).copied().unwrap_or(0);
        let next = (i64::from(self.counters.get(product_id)) + staged).max(0);
        u32::try_from(next).unwrap_or(u32::MAX)
    }

    fn stage(&mut self, product_id: u64, delta: i64) {
        *self.deltas.entry(product_id).or_insert(0) += delta;
    }

    pub fn reserve(
        &mut self,
        order_id: u64,
        items: &[OrderItem],
        now: i64,
        expires_at: i64,
    ) -> LedgerResult<()> {
        let wanted = aggregate(items);

        // Check everything before writing anything
        for &(product_id, requested) in &wanted {
            let product = self
                .storage
                .get_product_txn(&self.txn, product_id)?
                .ok_or(LedgerError::ProductNotFound(product_id))?;
            if !product.active {
                return Err(LedgerError::ProductInactive(product_id));
            }
            let free = product.available.saturating_sub(self.reserved(product_id));
            if free < requested {
                return Err(LedgerError::InsufficientStock {
                    product_id,
                    requested,
                    available: free,
                });
            }
        }

        for (product_id, quantity) in wanted {
            let row = match self
                .storage
                .get_reservation_txn(&self.txn, order_id, product_id)?
            {
                Some(mut existing) if !existing.released => {
                    existing.quantity = existing.quantity.saturating_add(quantity);
                    existing.expires_at = existing.expires_at.max(expires_at);
                    existing
                }
                _ => Reservation {
                    order_id,
                    product_id,
                    quantity,
                    created_at: now,
                    expires_at,
                    released: false,
                },
            };
            self.storage.put_reservation_txn(&self.txn, &row)?;
            self.stage(product_id, i64::from(quantity));
        }
        Ok(())
    }

    /// Mark the order's still-active rows for these products released
    ///
    /// Returns the released quantity.
    pub fn release(&mut self, order_id: u64, items: &[OrderItem]) -> LedgerResult<u32> {
        let mut released = 0u32;
        for (product_id, _) in aggregate(items) {
            let Some(mut row) = self
                .storage
                .get_reservation_txn(&self.txn, order_id, product_id)?
            else {
                continue;
            };
            if row.released {
                continue;
            }
            row.released = true;
            self.storage.put_reservation_txn(&self.txn, &row)?;

            // Rows already expired at the last rebuild were never counted
            if row.expires_at > self.counters.restored_at {
                self.stage(product_id, -i64::from(row.quantity));
            }
            released = released.saturating_add(row.quantity);
        }
        Ok(released)
    }

    /// Keep an order's holds alive until `until`
    pub fn extend_holds(&mut self, order_id: u64, until: i64) -> LedgerResult<()> {
        for mut row in self.storage.reservations_for_order_txn(&self.txn, order_id)? {
            if row.released || row.expires_at >= until {
                continue;
            }
            row.expires_at = until;
            self.storage.put_reservation_txn(&self.txn, &row)?;
        }
        Ok(())
    }

    pub fn final_deduction(&mut self, items: &[OrderItem]) -> LedgerResult<()> {
        for (product_id, quantity) in aggregate(items) {
            let mut product = self
                .storage
                .get_product_txn(&self.txn, product_id)?
                .ok_or(LedgerError::ProductNotFound(product_id))?;
            if product.available < quantity {
                tracing::error!(
                    product_id,
                    available = product.available,
                    requested = quantity,
                    "Integrity violation: final deduction would drive stock negative"
                );
                return Err(LedgerError::NegativeStock {
                    product_id,
                    available: product.available,
                    requested: quantity,
                });
            }
            product.available -= quantity;
            self.storage.put_product_txn(&self.txn, &product)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{Category, Product};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn product(id: u64, available: u32) -> Product {
        Product {
            id,
            title: format!("P{id}"),
            price: 10.0,
            category: Category::Electronics,
            brand: None,
            available,
            active: true,
            upsell_group_id: None,
        }
    }

    fn item(product_id: u64, quantity: u32) -> OrderItem {
        OrderItem::at_list_price(product_id, quantity, 10.0)
    }

    fn ledger_with(products: &[(u64, u32)]) -> ReservationLedger {
        let storage = DepotStorage::open_in_memory().unwrap();
        for &(id, available) in products {
            storage.put_product(&product(id, available)).unwrap();
        }
        ReservationLedger::new(storage)
    }

    fn far_future() -> i64 {
        now_millis() + 60_000
    }

    #[test]
    fn test_reserve_and_release() {
        let ledger = ledger_with(&[(1, 5)]);
        ledger.reserve(100, &[item(1, 3)], far_future()).unwrap();
        assert_eq!(ledger.reserved(1), 3);
        assert!(ledger.validate_stock(1, 2).unwrap());
        assert!(!ledger.validate_stock(1, 3).unwrap());

        assert_eq!(ledger.release(100, &[item(1, 3)]).unwrap(), 3);
        assert_eq!(ledger.reserved(1), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let ledger = ledger_with(&[(1, 5)]);
        ledger.reserve(1, &[item(1, 2)], far_future()).unwrap();
        ledger.reserve(2, &[item(1, 2)], far_future()).unwrap();

        assert_eq!(ledger.release(1, &[item(1, 2)]).unwrap(), 2);
        assert_eq!(ledger.release(1, &[item(1, 2)]).unwrap(), 0);
        assert_eq!(ledger.reserved(1), 2);
    }

    #[test]
    fn test_reserve_is_all_or_nothing() {
        let ledger = ledger_with(&[(1, 5), (2, 1)]);
        let err = ledger
            .reserve(7, &[item(1, 2), item(2, 2)], far_future())
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                product_id: 2,
                requested: 2,
                available: 1
            }
        ));
        assert_eq!(ledger.reserved(1), 0);
        assert!(ledger.storage().reservations_for_order(7).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_lines_are_summed() {
        let ledger = ledger_with(&[(1, 3)]);
        let err = ledger
            .reserve(1, &[item(1, 2), item(1, 2)], far_future())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { requested: 4, .. }));

        ledger
            .reserve(1, &[item(1, 1), item(1, 2)], far_future())
            .unwrap();
        let rows = ledger.storage().reservations_for_order(1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 3);
    }

    #[test]
    fn test_unknown_and_inactive_products() {
        let ledger = ledger_with(&[(1, 3)]);
        let mut inactive = product(2, 3);
        inactive.active = false;
        ledger.storage().put_product(&inactive).unwrap();

        assert!(matches!(
            ledger.reserve(1, &[item(9, 1)], far_future()),
            Err(LedgerError::ProductNotFound(9))
        ));
        assert!(matches!(
            ledger.reserve(1, &[item(2, 1)], far_future()),
            Err(LedgerError::ProductInactive(2))
        ));
        assert!(!ledger.validate_stock(9, 1).unwrap());
        assert!(!ledger.validate_stock(2, 1).unwrap());
    }

    #[test]
    fn test_final_deduction_refuses_negative_stock() {
        let ledger = ledger_with(&[(1, 2), (2, 5)]);
        let err = ledger
            .final_deduction(&[item(2, 1), item(1, 3)])
            .unwrap_err();
        assert!(matches!(err, LedgerError::NegativeStock { product_id: 1, .. }));
        // Aborted as a whole
        assert_eq!(ledger.storage().get_product(2).unwrap().unwrap().available, 5);

        ledger.final_deduction(&[item(1, 2)]).unwrap();
        assert_eq!(ledger.storage().get_product(1).unwrap().unwrap().available, 0);
    }

    #[test]
    fn test_failed_transaction_keeps_counters() {
        let ledger = ledger_with(&[(1, 5)]);
        let result: LedgerResult<()> = ledger.transact(|hold| {
            hold.reserve(1, &[item(1, 2)], 0, far_future())?;
            assert_eq!(hold.reserved(1), 2);
            Err(LedgerError::ProductNotFound(99))
        });
        assert!(result.is_err());
        assert_eq!(ledger.reserved(1), 0);
        assert!(ledger.storage().reservations_for_order(1).unwrap().is_empty());
    }

    #[test]
    fn test_restore_counts_only_live_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        {
            let storage = DepotStorage::open(&path).unwrap();
            storage.put_product(&product(1, 10)).unwrap();
            let ledger = ReservationLedger::new(storage);
            ledger.reserve(1, &[item(1, 2)], far_future()).unwrap();
            ledger.reserve(2, &[item(1, 3)], now_millis() - 1).unwrap();
            ledger.reserve(3, &[item(1, 4)], far_future()).unwrap();
            ledger.release(3, &[item(1, 4)]).unwrap();
        }

        let ledger = ReservationLedger::new(DepotStorage::open(&path).unwrap());
        assert_eq!(ledger.restore_reservations().unwrap(), 1);
        assert_eq!(ledger.reserved(1), 2);

        // The expired hold was not counted, so releasing it must not eat into order 1's hold
        assert_eq!(ledger.release(2, &[item(1, 3)]).unwrap(), 3);
        assert_eq!(ledger.reserved(1), 2);
    }

    #[test]
    fn test_concurrent_reservations_never_oversell() {
        const STOCK: u32 = 10;
        let ledger = Arc::new(ledger_with(&[(1, STOCK)]));
        let accepted = Arc::new(AtomicUsize::new(0));
        let rejected = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for order_id in 0..=u64::from(STOCK) {
                let ledger = ledger.clone();
                let accepted = accepted.clone();
                let rejected = rejected.clone();
                s.spawn(move || match ledger.reserve(order_id, &[item(1, 1)], far_future()) {
                    Ok(()) => {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(LedgerError::InsufficientStock { .. }) => {
                        rejected.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => panic!("unexpected error: {e}"),
                });
            }
        });

        assert_eq!(accepted.load(Ordering::SeqCst), STOCK as usize);
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.reserved(1), STOCK);
        assert_eq!(ledger.snapshot().get(&1), Some(&STOCK));
    }
}
