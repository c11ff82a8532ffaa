use crate::errors::AutomationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// One item added to the cart. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineItem {
    pub name: String,
    pub price: f64,
    pub category: String,
    pub added_at: DateTime<Utc>,
}

impl CartLineItem {
    pub fn new(name: impl Into<String>, price: f64, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            // NaN and negatives collapse to zero
            price: if price > 0.0 { price } else { 0.0 },
            category: category.into(),
            added_at: Utc::now(),
        }
    }
}

/// Append-only record of the items added during a run
#[derive(Debug, Clone, Default)]
pub struct CartLedger {
    items: Vec<CartLineItem>,
}

impl CartLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, item: CartLineItem) {
        debug!(name = %item.name, price = item.price, category = %item.category, "cart append");
        self.items.push(item);
    }

    /// Items in insertion order
    pub fn items(&self) -> &[CartLineItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.items.iter().map(|i| i.price).sum()
    }

    /// Only called between runs
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            items: self.items.clone(),
            total: self.total(),
            items_count: self.items.len(),
            exported_at: Utc::now(),
        }
    }
}

/// Immutable copy of the ledger handed to downstream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartSnapshot {
    pub items: Vec<CartLineItem>,
    pub total: f64,
    pub items_count: usize,
    pub exported_at: DateTime<Utc>,
}

impl CartSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), AutomationError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), items = self.items_count, total = self.total, "Cart exported");
        Ok(())
    }
}
