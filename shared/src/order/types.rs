//! Shared order types

use super::OrderStatus;
use serde::{Deserialize, Serialize};

// ============================================================================
// Items & Totals
// ============================================================================

/// Line item with its price frozen at add-to-cart time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: u64,
    pub quantity: u32,
    /// Price actually charged per unit
    pub unit_price: f64,
    /// Catalog price per unit at the same instant (basis for the discount total)
    pub list_price: f64,
    #[serde(default)]
    pub is_upsell: bool,
}

impl OrderItem {
    /// Item charged at catalog price
    pub fn at_list_price(product_id: u64, quantity: u32, price: f64) -> Self {
        Self {
            product_id,
            quantity,
            unit_price: price,
            list_price: price,
            is_upsell: false,
        }
    }
}

/// Order totals, rounded to cents
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Totals {
    pub total_without_discount: f64,
    pub discount_total: f64,
    pub total_with_discount: f64,
}

// ============================================================================
// Order metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Cash,
}

/// Where the order came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSource {
    #[default]
    Normal,
    /// Placed from a reminder campaign message
    Reminder,
}

/// Delivery slot chosen by the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySlot {
    /// Courier window, e.g. "14-16"
    pub interval: String,
    /// Exact time within the window, e.g. "14:30"
    #[serde(default)]
    pub exact_time: Option<String>,
}

// ============================================================================
// Order
// ============================================================================

/// Order record as persisted in the durable store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub user_id: i64,
    pub items: Vec<OrderItem>,
    pub totals: Totals,
    pub status: OrderStatus,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis of the last status/metadata change
    pub updated_at: i64,
    /// Absolute hold expiry (Unix millis)
    pub expires_at: i64,
    #[serde(default)]
    pub courier_id: Option<u64>,
    #[serde(default)]
    pub delivery_slot: Option<DeliverySlot>,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub source: OrderSource,
    #[serde(default)]
    pub delivered_at: Option<i64>,
    /// Set at confirm, once the order has a row in the external ledger
    #[serde(default)]
    pub published: bool,
    /// True once the terminal write is confirmed by the external ledger
    #[serde(default)]
    pub external_sync_committed: bool,
}

impl Order {
    /// Cancelled after publication and the external row not yet rewritten
    pub fn needs_cancel_sync(&self) -> bool {
        self.status == OrderStatus::Cancelled && self.published && !self.external_sync_committed
    }

    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }

    /// Total quantity across all items
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |total, i| total.saturating_add(i.quantity))
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Soft hold against a product's available stock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub order_id: u64,
    pub product_id: u64,
    pub quantity: u32,
    pub created_at: i64,
    pub expires_at: i64,
    #[serde(default)]
    pub released: bool,
}

impl Reservation {
    /// Counts toward the reserved total
    pub fn is_active_at(&self, now_millis: i64) -> bool {
        !self.released && self.expires_at > now_millis
    }
}
