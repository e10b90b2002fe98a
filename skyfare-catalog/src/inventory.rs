use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Identifies a stock pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StockKey {
    Seat(i64),
    Baggage(i64),
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockKey::Seat(id) => write!(f, "seat:{}", id),
            StockKey::Baggage(id) => write!(f, "baggage:{}", id),
        }
    }
}

/// Inventory tracking for a seat class or baggage type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryItem {
    pub key: StockKey,
    /// `None` for pools without a stock limit
    pub available_quantity: Option<i32>,
    pub reserved_quantity: i32,
}

/// In-memory stock ledger backing the in-process settlement store
#[derive(Debug, Clone, Default)]
pub struct InventoryManager {
    inventory: HashMap<StockKey, InventoryItem>,
}

impl InventoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize a pool with `available` units; `None` means unlimited.
    pub fn initialize(&mut self, key: StockKey, available: Option<i32>) {
        self.inventory.insert(
            key,
            InventoryItem {
                key,
                available_quantity: available,
                reserved_quantity: 0,
            },
        );
    }

    pub fn get(&self, key: &StockKey) -> Option<&InventoryItem> {
        self.inventory.get(key)
    }

    pub fn available(&self, key: &StockKey) -> Option<i32> {
        self.inventory.get(key).and_then(|item| item.available_quantity)
    }

    /// Decrement only if enough units remain. Stock never goes negative.
    pub fn reserve(&mut self, key: &StockKey, quantity: i32) -> Result<(), InventoryError> {
        let item = self
            .inventory
            .get_mut(key)
            .ok_or_else(|| InventoryError::NotFound(key.to_string()))?;

        if let Some(available) = item.available_quantity {
            if available < quantity {
                return Err(InventoryError::InsufficientInventory {
                    requested: quantity,
                    available,
                });
            }
            item.available_quantity = Some(available - quantity);
        }
        item.reserved_quantity += quantity;

        Ok(())
    }

    /// Return units taken by a failed settlement.
    pub fn release(&mut self, key: &StockKey, quantity: i32) -> Result<(), InventoryError> {
        let item = self
            .inventory
            .get_mut(key)
            .ok_or_else(|| InventoryError::NotFound(key.to_string()))?;

        if let Some(available) = item.available_quantity {
            item.available_quantity = Some(available + quantity);
        }
        item.reserved_quantity = item.reserved_quantity.saturating_sub(quantity);

        Ok(())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InventoryError {
    #[error("Inventory not found: {0}")]
    NotFound(String),

    #[error("Insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory { requested: i32, available: i32 },
}
