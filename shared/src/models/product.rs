//! Product Model

use serde::{Deserialize, Serialize};
use std::fmt;

/// Product category
///
/// `liquids` is priced by quantity tiers, everything else uses the catalog price.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Liquids,
    Electronics,
    #[serde(untagged)]
    Other(String),
}

impl Category {
    pub fn as_str(&self) -> &str {
        match self {
            Category::Liquids => "liquids",
            Category::Electronics => "electronics",
            Category::Other(name) => name,
        }
    }

    /// Parse a category label from the catalog sheet (case-insensitive)
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "liquids" | "liquid" => Category::Liquids,
            "electronics" => Category::Electronics,
            other => Category::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Product entity
///
/// `available` is the permanent on-hand quantity. Soft holds live in the
/// reservation ledger and are never subtracted here until delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub title: String,
    /// Catalog unit price
    pub price: f64,
    pub category: Category,
    #[serde(default)]
    pub brand: Option<String>,
    pub available: u32,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Products sharing a group are offered as upsell alternatives
    #[serde(default)]
    pub upsell_group_id: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Product {
    /// Sellable = active and has stock on hand
    pub fn is_sellable(&self) -> bool {
        self.active && self.available > 0
    }
}
