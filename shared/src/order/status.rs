//! Order status and the transition table

use serde::{Deserialize, Serialize};
use std::fmt;

/// Order lifecycle status
///
/// ```text
/// buffer ──► pending ──► courier_assigned ──► delivered
///   │           │               │
///   │           └──► cancelled ◄┤
///   ├──► cancelled              └──► not_issued ──► (purged)
///   └──► expired
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Cart checked out, stock held, awaiting confirmation
    Buffer,
    /// Confirmed by the customer, published to the external ledger
    Pending,
    CourierAssigned,
    Delivered,
    Cancelled,
    /// Hold TTL elapsed before confirmation
    Expired,
    /// Delivery attempt failed
    NotIssued,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 7] = [
        OrderStatus::Buffer,
        OrderStatus::Pending,
        OrderStatus::CourierAssigned,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Expired,
        OrderStatus::NotIssued,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Buffer => "buffer",
            OrderStatus::Pending => "pending",
            OrderStatus::CourierAssigned => "courier_assigned",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
            OrderStatus::NotIssued => "not_issued",
        }
    }

    /// No lifecycle transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::NotIssued
        )
    }

    /// Statuses in which the order row exists in the external ledger
    pub fn is_published(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending | OrderStatus::CourierAssigned | OrderStatus::Delivered
        )
    }

    /// Explicit transition table. Anything not listed here is refused.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Buffer, Pending)
                | (Buffer, Expired)
                | (Buffer, Cancelled)
                | (Pending, CourierAssigned)
                | (Pending, Cancelled)
                | (CourierAssigned, Delivered)
                | (CourierAssigned, Cancelled)
                | (CourierAssigned, NotIssued)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        for from in OrderStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for to in OrderStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be refused");
            }
        }
    }

    #[test]
    fn test_happy_path_is_allowed() {
        assert!(OrderStatus::Buffer.can_transition_to(OrderStatus::Pending));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::CourierAssigned));
        assert!(OrderStatus::CourierAssigned.can_transition_to(OrderStatus::Delivered));
    }

    #[test]
    fn test_expire_only_from_buffer() {
        for from in OrderStatus::ALL {
            assert_eq!(
                from.can_transition_to(OrderStatus::Expired),
                from == OrderStatus::Buffer
            );
        }
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::CourierAssigned).unwrap(),
            "\"courier_assigned\""
        );
        assert_eq!(OrderStatus::NotIssued.to_string(), "not_issued");
    }
}
