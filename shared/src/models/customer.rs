//! Customer segment and reminder schedule

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Marketing segment of a customer
///
/// `Sale10` is assigned by the reminder campaign and grants 10% off tiered
/// categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSegment {
    #[default]
    Regular,
    Sale10,
}

impl CustomerSegment {
    /// Percentage discount applied to tiered unit prices
    pub fn discount_percent(&self) -> u32 {
        match self {
            CustomerSegment::Regular => 0,
            CustomerSegment::Sale10 => 10,
        }
    }
}

/// Per-customer pricing state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerProfile {
    #[serde(default)]
    pub segment: CustomerSegment,
    /// Date of the last delivered order
    #[serde(default)]
    pub last_purchase: Option<NaiveDate>,
    /// Day the reminder campaign picks the customer up
    #[serde(default)]
    pub next_reminder: Option<NaiveDate>,
}

impl CustomerProfile {
    pub fn reminder_due(&self, today: NaiveDate) -> bool {
        self.next_reminder.is_some_and(|day| day <= today)
    }
}
