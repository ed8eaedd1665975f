//! Courier Model

use serde::{Deserialize, Serialize};

/// Courier entity (read-only reference data)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Courier {
    pub id: u64,
    pub name: String,
    /// Chat account of the courier, used by the front-end to route commands
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Usual delivery window, e.g. "12:00-18:00"
    #[serde(default)]
    pub delivery_interval: Option<String>,
}

fn default_true() -> bool {
    true
}
