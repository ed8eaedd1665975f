//! OrdersManager - the order state machine
//!
//! # Transition flow
//!
//! ```text
//! transition(order_id)
//!     ├─ 1. Enter the ledger critical section (mutex + write txn)
//!     ├─ 2. Load the order, check the transition table
//!     ├─ 3. Reserve / release / deduct as the transition requires
//!     ├─ 4. Store the order (index tables follow)
//!     ├─ 5. Commit, apply counter deltas
//!     └─ 6. Queue the external ledger job (fire-and-forget)
//! ```
//!
//! A refused transition returns an error and leaves the store and the
//! counters exactly as they were.

mod error;
pub use error::*;

use super::pricing::{CartLine, PriceTable, compute_totals};
use crate::inventory::{HoldTxn, ReservationLedger};
use crate::ledger_sync::{SyncHandle, SyncJob};
use crate::services::CatalogService;
use crate::store::DepotStorage;
use chrono::{Days, Local, NaiveDate};
use parking_lot::RwLock;
use serde::Serialize;
use shared::models::CustomerSegment;
use shared::order::{
    DeliverySlot, Order, OrderItem, OrderSource, OrderStatus, PaymentMethod, Totals,
};
use shared::util::{minutes_to_millis, now_millis};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Holds of confirmed orders never lapse on their own
const CONFIRMED_HOLD_EXPIRY: i64 = i64::MAX;

/// Days between a delivery and the customer's reminder
pub const DEFAULT_REMINDER_OFFSET_DAYS: u64 = 7;

/// Tunables of the lifecycle
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// How long a buffer order holds stock without confirmation
    pub reservation_ttl: Duration,
    /// Initial tier table; replaced at runtime by the sheet refresh
    pub price_table: PriceTable,
    pub reminder_offset_days: u64,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: Duration::from_millis(minutes_to_millis(15) as u64),
            price_table: PriceTable::default(),
            reminder_offset_days: DEFAULT_REMINDER_OFFSET_DAYS,
        }
    }
}

/// Reserved quantities and outstanding external commits
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStatus {
    pub reserved: BTreeMap<u64, u32>,
    pub pending_external_commits: u64,
}

pub struct OrdersManager {
    storage: DepotStorage,
    ledger: Arc<ReservationLedger>,
    catalog: CatalogService,
    sync: SyncHandle,
    settings: ManagerSettings,
    prices: RwLock<PriceTable>,
}

impl std::fmt::Debug for OrdersManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrdersManager")
            .field("storage", &"<DepotStorage>")
            .field("ledger", &self.ledger)
            .field("settings", &self.settings)
            .finish()
    }
}

impl OrdersManager {
    pub fn new(
        ledger: Arc<ReservationLedger>,
        catalog: CatalogService,
        sync: SyncHandle,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            storage: ledger.storage().clone(),
            prices: RwLock::new(settings.price_table.clone()),
            ledger,
            catalog,
            sync,
            settings,
        }
    }

    /// Manager over an existing store with default settings and no external sync
    pub fn with_storage(storage: DepotStorage) -> Self {
        let catalog = CatalogService::new(storage.clone());
        Self::new(
            Arc::new(ReservationLedger::new(storage)),
            catalog,
            SyncHandle::disabled(),
            ManagerSettings::default(),
        )
    }

    pub fn storage(&self) -> &DepotStorage {
        &self.storage
    }

    pub fn ledger(&self) -> &Arc<ReservationLedger> {
        &self.ledger
    }

    pub fn catalog(&self) -> &CatalogService {
        &self.catalog
    }

    fn ttl_millis(&self) -> i64 {
        i64::try_from(self.settings.reservation_ttl.as_millis()).unwrap_or(i64::MAX)
    }

    // ========== Queries ==========

    pub fn get_order(&self, order_id: u64) -> ManagerResult<Order> {
        self.storage
            .get_order(order_id)?
            .ok_or(ManagerError::OrderNotFound(order_id))
    }

    pub fn list_orders_by_status(&self, status: OrderStatus) -> ManagerResult<Vec<Order>> {
        let mut orders = if status.is_terminal() {
            self.storage.list_orders_where(|o| o.status == status)?
        } else {
            let mut active = self.storage.list_active_orders()?;
            active.retain(|o| o.status == status);
            active
        };
        orders.sort_by_key(|o| o.id);
        Ok(orders)
    }

    /// Reserved quantity per product and count of deliveries awaiting external commit
    pub fn observability(&self) -> ManagerResult<LedgerStatus> {
        Ok(LedgerStatus {
            reserved: self.ledger.snapshot(),
            pending_external_commits: self.storage.count_unsynced_deliveries()?,
        })
    }

    // ========== Pricing ==========

    /// Totals exactly as `create` will persist them
    pub fn preview_totals(&self, items: &[OrderItem]) -> Totals {
        compute_totals(items)
    }

    /// Freeze cart lines at today's prices for this customer
    pub fn price_cart(&self, user_id: i64, lines: &[CartLine]) -> ManagerResult<Vec<OrderItem>> {
        let segment = self.storage.get_customer_segment(user_id)?;
        let ids: Vec<u64> = lines.iter().map(|l| l.product_id).collect();
        let products = self.catalog.products_by_id(&ids)?;
        Ok(self.prices.read().price_lines(lines, &products, segment)?)
    }

    pub fn price_table(&self) -> PriceTable {
        self.prices.read().clone()
    }

    /// Replace the tier table used for new carts; frozen order items keep their prices
    pub fn set_price_table(&self, table: PriceTable) {
        let mut current = self.prices.write();
        if *current != table {
            tracing::info!(category = %table.category(), "Price tiers updated");
            *current = table;
        }
    }

    pub fn set_customer_segment(&self, user_id: i64, segment: CustomerSegment) -> ManagerResult<()> {
        self.storage.set_customer_segment(user_id, segment)?;
        tracing::info!(user_id, segment = ?segment, "Customer segment updated");
        Ok(())
    }

    // ========== Reminders ==========

    /// Move every customer whose reminder date has come to `sale10`
    pub fn apply_due_reminders(&self) -> ManagerResult<usize> {
        self.apply_due_reminders_on(Local::now().date_naive())
    }

    pub fn apply_due_reminders_on(&self, today: NaiveDate) -> ManagerResult<usize> {
        let mut applied = 0;
        for user_id in self.storage.list_due_reminders(today)? {
            let mut changed = false;
            self.storage.update_customer(user_id, |profile| {
                if profile.reminder_due(today) {
                    profile.segment = CustomerSegment::Sale10;
                    profile.next_reminder = None;
                    changed = true;
                }
            })?;
            if changed {
                applied += 1;
                tracing::info!(user_id, "Reminder applied, customer moved to sale10");
            }
        }
        Ok(applied)
    }

    /// Schedule the next reminder after a delivery; the discount is used up
    fn record_purchase(&self, user_id: i64, today: NaiveDate) {
        let next = today.checked_add_days(Days::new(self.settings.reminder_offset_days));
        let result = self.storage.update_customer(user_id, |profile| {
            profile.segment = CustomerSegment::Regular;
            profile.last_purchase = Some(today);
            profile.next_reminder = next;
        });
        if let Err(e) = result {
            tracing::warn!(user_id, error = %e, "Failed to update customer after delivery");
        }
    }

    // ========== Transitions ==========

    /// Create a buffer order and hold its stock
    ///
    /// The order row and its reservations are written in one transaction, so a
    /// refused reservation leaves nothing behind.
    pub fn create(
        &self,
        user_id: i64,
        items: Vec<OrderItem>,
        source: Option<OrderSource>,
    ) -> ManagerResult<Order> {
        if items.is_empty() {
            return Err(ManagerError::EmptyOrder);
        }
        if let Some(item) = items.iter().find(|i| i.quantity == 0) {
            return Err(ManagerError::Validation(format!(
                "quantity must be positive for product {}",
                item.product_id
            )));
        }
        if let Some(item) = items
            .iter()
            .find(|i| !i.unit_price.is_finite() || i.unit_price < 0.0)
        {
            return Err(ManagerError::Validation(format!(
                "invalid unit price for product {}",
                item.product_id
            )));
        }

        let source = match source {
            Some(source) => source,
            None => match self.storage.get_customer_segment(user_id)? {
                CustomerSegment::Sale10 => OrderSource::Reminder,
                CustomerSegment::Regular => OrderSource::Normal,
            },
        };
        let totals = compute_totals(&items);
        let now = now_millis();
        let expires_at = now.saturating_add(self.ttl_millis());

        let order = self.ledger.transact(|hold| -> ManagerResult<Order> {
            let id = hold.storage().next_order_id(hold.txn())?;
            let order = Order {
                id,
                user_id,
                items,
                totals,
                status: OrderStatus::Buffer,
                created_at: now,
                updated_at: now,
                expires_at,
                courier_id: None,
                delivery_slot: None,
                payment_method: None,
                source,
                delivered_at: None,
                published: false,
                external_sync_committed: false,
            };
            hold.reserve(id, &order.items, now, expires_at)?;
            hold.storage().put_order_txn(hold.txn(), &order)?;
            Ok(order)
        })?;

        tracing::info!(
            order_id = order.id,
            user_id,
            items = order.items.len(),
            total = order.totals.total_with_discount,
            "Order created"
        );
        Ok(order)
    }

    /// Price a cart and create the order from it
    pub fn create_from_cart(&self, user_id: i64, lines: &[CartLine]) -> ManagerResult<Order> {
        let items = self.price_cart(user_id, lines)?;
        self.create(user_id, items, None)
    }

    /// `buffer → pending`, then publish the order externally
    pub fn confirm(&self, order_id: u64) -> ManagerResult<Order> {
        let now = now_millis();
        let order = self.ledger.transact(|hold| -> ManagerResult<Order> {
            let mut order = load(hold, order_id)?;
            ensure_transition(&order, OrderStatus::Pending)?;
            if order.is_expired_at(now) {
                return Err(ManagerError::OrderExpired(order_id));
            }
            hold.extend_holds(order_id, CONFIRMED_HOLD_EXPIRY)?;
            order.status = OrderStatus::Pending;
            order.published = true;
            order.updated_at = now;
            hold.storage().put_order_txn(hold.txn(), &order)?;
            Ok(order)
        })?;

        tracing::info!(order_id, "Order confirmed");
        self.sync.notify(SyncJob::AppendRecord(order.clone()));
        Ok(order)
    }

    /// `pending → courier_assigned`; same courier again is a no-op
    pub fn assign_courier(&self, order_id: u64, courier_id: u64) -> ManagerResult<Order> {
        let courier = self
            .catalog
            .get_courier(courier_id)
            .filter(|c| c.active)
            .ok_or(ManagerError::CourierNotFound(courier_id))?;

        let now = now_millis();
        let mut previous = None;
        let order = self.storage.update_order(order_id, |order| {
            match order.status {
                OrderStatus::CourierAssigned if order.courier_id == Some(courier_id) => {
                    return Ok(());
                }
                OrderStatus::CourierAssigned => {
                    previous = order.courier_id;
                }
                _ => ensure_transition(order, OrderStatus::CourierAssigned)?,
            }
            order.status = OrderStatus::CourierAssigned;
            order.courier_id = Some(courier_id);
            order.updated_at = now;
            Ok::<(), ManagerError>(())
        })?;

        match previous {
            Some(previous) => tracing::info!(
                order_id,
                previous_courier = previous,
                courier_id,
                "Courier reassigned"
            ),
            None => tracing::info!(order_id, courier_id, courier = %courier.name, "Courier assigned"),
        }
        Ok(order)
    }

    pub fn set_delivery_slot(&self, order_id: u64, slot: DeliverySlot) -> ManagerResult<Order> {
        self.update_metadata(order_id, |order| order.delivery_slot = Some(slot))
    }

    pub fn clear_delivery_slot(&self, order_id: u64) -> ManagerResult<Order> {
        self.update_metadata(order_id, |order| order.delivery_slot = None)
    }

    pub fn set_payment_method(
        &self,
        order_id: u64,
        method: PaymentMethod,
    ) -> ManagerResult<Order> {
        self.update_metadata(order_id, |order| order.payment_method = Some(method))
    }

    fn update_metadata(
        &self,
        order_id: u64,
        apply: impl FnOnce(&mut Order),
    ) -> ManagerResult<Order> {
        let now = now_millis();
        self.storage.update_order(order_id, |order| {
            if order.status.is_terminal() {
                return Err(ManagerError::OrderClosed {
                    order_id,
                    status: order.status,
                });
            }
            apply(order);
            order.updated_at = now;
            Ok(())
        })
    }

    /// `courier_assigned → delivered`: deduct stock, release holds, queue the external commit
    pub fn mark_delivered(&self, order_id: u64, courier_id: u64) -> ManagerResult<Order> {
        let now = now_millis();
        let result = self.ledger.transact(|hold| -> ManagerResult<Order> {
            let mut order = load(hold, order_id)?;
            ensure_transition(&order, OrderStatus::Delivered)?;
            if order.courier_id != Some(courier_id) {
                return Err(ManagerError::AuthorizationMismatch {
                    order_id,
                    assigned: order.courier_id,
                    acting: courier_id,
                });
            }
            hold.final_deduction(&order.items)?;
            hold.release(order_id, &order.items)?;
            order.status = OrderStatus::Delivered;
            order.delivered_at = Some(now);
            order.updated_at = now;
            order.external_sync_committed = false;
            hold.storage().put_order_txn(hold.txn(), &order)?;
            Ok(order)
        });

        let order = match result {
            Ok(order) => order,
            Err(ManagerError::AuthorizationMismatch {
                order_id,
                assigned,
                acting,
            }) => {
                crate::security_log!(
                    "delivery_refused",
                    order_id,
                    assigned_courier = ?assigned,
                    acting_courier = acting,
                    "Delivery refused: courier is not assigned to this order"
                );
                return Err(ManagerError::AuthorizationMismatch {
                    order_id,
                    assigned,
                    acting,
                });
            }
            Err(e @ ManagerError::NegativeStock { .. }) => {
                tracing::error!(order_id, error = %e, "Delivery aborted by stock integrity check");
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(order_id, courier_id, "Order delivered");
        self.sync.notify(SyncJob::CommitDelivery(order_id));
        self.record_purchase(order.user_id, Local::now().date_naive());
        Ok(order)
    }

    /// Cancel from buffer, pending or courier_assigned
    pub fn cancel(&self, order_id: u64) -> ManagerResult<Order> {
        let now = now_millis();
        let (order, was_published) = self.ledger.transact(|hold| -> ManagerResult<_> {
            let mut order = load(hold, order_id)?;
            ensure_transition(&order, OrderStatus::Cancelled)?;
            let was_published = order.published || order.status.is_published();
            order.published = was_published;
            hold.release(order_id, &order.items)?;
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            hold.storage().put_order_txn(hold.txn(), &order)?;
            Ok((order, was_published))
        })?;

        tracing::info!(order_id, was_published, "Order cancelled");
        if was_published {
            self.sync.notify(SyncJob::RecordCancelled(order_id));
        }
        Ok(order)
    }

    /// `buffer → expired` if the order is still in buffer
    ///
    /// Returns whether this call made the transition. Losing the race to a
    /// confirm (or to another sweep) is not an error.
    pub fn expire(&self, order_id: u64) -> ManagerResult<bool> {
        let now = now_millis();
        let expired = self.ledger.transact(|hold| -> ManagerResult<bool> {
            let mut order = load(hold, order_id)?;
            if order.status != OrderStatus::Buffer {
                return Ok(false);
            }
            hold.release(order_id, &order.items)?;
            order.status = OrderStatus::Expired;
            order.updated_at = now;
            hold.storage().put_order_txn(hold.txn(), &order)?;
            Ok(true)
        })?;

        if expired {
            tracing::info!(order_id, "Order expired");
        } else {
            tracing::debug!(order_id, "Expire skipped, order left buffer");
        }
        Ok(expired)
    }

    /// `courier_assigned → not_issued`; holds released, slot cleared, stock untouched
    pub fn set_not_issued(&self, order_id: u64) -> ManagerResult<Order> {
        let now = now_millis();
        let order = self.ledger.transact(|hold| -> ManagerResult<Order> {
            let mut order = load(hold, order_id)?;
            ensure_transition(&order, OrderStatus::NotIssued)?;
            hold.release(order_id, &order.items)?;
            order.status = OrderStatus::NotIssued;
            order.delivery_slot = None;
            order.updated_at = now;
            hold.storage().put_order_txn(hold.txn(), &order)?;
            Ok(order)
        })?;

        tracing::info!(order_id, "Order marked not issued");
        Ok(order)
    }

    // ========== Sweeps ==========

    /// Expire every buffer order whose hold has lapsed
    pub fn expire_due_orders(&self) -> ManagerResult<usize> {
        self.expire_due_orders_at(now_millis())
    }

    pub fn expire_due_orders_at(&self, now: i64) -> ManagerResult<usize> {
        let due: Vec<u64> = self
            .storage
            .list_active_orders()?
            .into_iter()
            .filter(|o| o.status == OrderStatus::Buffer && o.is_expired_at(now))
            .map(|o| o.id)
            .collect();

        let mut expired = 0;
        for order_id in due {
            match self.expire(order_id) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(order_id, error = %e, "Failed to expire order"),
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Expiry sweep finished");
        }
        Ok(expired)
    }

    /// Physically delete `not_issued` orders untouched for `older_than_minutes`
    pub fn purge_stale_not_issued(&self, older_than_minutes: u64) -> ManagerResult<usize> {
        let cutoff = now_millis().saturating_sub(minutes_to_millis(older_than_minutes));
        let stale = self.storage.list_orders_where(|o| {
            o.status == OrderStatus::NotIssued && o.updated_at <= cutoff
        })?;
        if stale.is_empty() {
            return Ok(0);
        }

        let txn = self.storage.begin_write()?;
        for order in &stale {
            self.storage.remove_order_txn(&txn, order.id)?;
        }
        txn.commit().map_err(crate::store::StorageError::from)?;

        tracing::info!(purged = stale.len(), "Purged stale not-issued orders");
        Ok(stale.len())
    }

    /// Cancel published orders that never reached delivery within `max_age`
    pub fn cancel_stale_orders(&self, max_age: Duration) -> ManagerResult<usize> {
        let max_age = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(max_age);
        let stale: Vec<u64> = self
            .storage
            .list_active_orders()?
            .into_iter()
            .filter(|o| {
                matches!(
                    o.status,
                    OrderStatus::Pending | OrderStatus::CourierAssigned
                ) && o.created_at <= cutoff
            })
            .map(|o| o.id)
            .collect();

        let mut cancelled = 0;
        for order_id in stale {
            match self.cancel(order_id) {
                Ok(_) => cancelled += 1,
                // Moved on concurrently
                Err(ManagerError::InvalidTransition { .. } | ManagerError::OrderClosed { .. }) => {}
                Err(e) => tracing::warn!(order_id, error = %e, "Failed to cancel stale order"),
            }
        }
        if cancelled > 0 {
            tracing::info!(cancelled, "Stale orders cancelled");
        }
        Ok(cancelled)
    }

    /// Drop the exact delivery time of every open order, keeping the interval
    pub fn clear_stale_delivery_slots(&self) -> ManagerResult<usize> {
        let targets: Vec<u64> = self
            .storage
            .list_active_orders()?
            .into_iter()
            .filter(|o| {
                o.delivery_slot
                    .as_ref()
                    .is_some_and(|s| s.exact_time.is_some())
            })
            .map(|o| o.id)
            .collect();

        let mut cleared = 0;
        for order_id in targets {
            let result = self.storage.update_order(order_id, |order| {
                if let Some(slot) = order.delivery_slot.as_mut() {
                    slot.exact_time = None;
                }
                Ok::<(), ManagerError>(())
            });
            match result {
                Ok(_) => cleared += 1,
                Err(e) => tracing::warn!(order_id, error = %e, "Failed to clear delivery slot"),
            }
        }
        tracing::debug!(cleared, "Delivery slot cleanup finished");
        Ok(cleared)
    }
}

fn load(hold: &HoldTxn<'_>, order_id: u64) -> ManagerResult<Order> {
    hold.storage()
        .get_order_txn(hold.txn(), order_id)?
        .ok_or(ManagerError::OrderNotFound(order_id))
}

fn ensure_transition(order: &Order, next: OrderStatus) -> ManagerResult<()> {
    if order.status.can_transition_to(next) {
        return Ok(());
    }
    if order.status.is_terminal() {
        return Err(ManagerError::OrderClosed {
            order_id: order.id,
            status: order.status,
        });
    }
    Err(ManagerError::InvalidTransition {
        order_id: order.id,
        from: order.status,
        to: next,
    })
}

#[cfg(test)]
mod tests;
