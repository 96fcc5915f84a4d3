use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ProductId;

/// Default reorder level for newly tracked products.
pub const DEFAULT_REORDER_LEVEL: i64 = 10;

/// Default maximum stock level for newly tracked products.
pub const DEFAULT_MAX_STOCK_LEVEL: i64 = 1000;

/// Version number of a ledger entry, incremented on every mutation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of a freshly created entry.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse stock status derived from available quantity and reorder level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    InStock,
    LowStock,
    OutOfStock,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::InStock => "IN_STOCK",
            StockStatus::LowStock => "LOW_STOCK",
            StockStatus::OutOfStock => "OUT_OF_STOCK",
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A request that could not be satisfied from the available pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: i64,
    pub available: i64,
}

/// Why a quantity adjustment was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustError {
    /// The change would remove units promised to reservations.
    Shortfall(Shortfall),
    /// The resulting quantity does not fit in an `i64`.
    OutOfRange,
}

/// The authoritative stock record for one product.
///
/// `available_quantity` is never stored; it is always computed from
/// `quantity` and `reserved_quantity`. The mutation methods keep
/// `0 <= reserved_quantity <= quantity` and refuse any change that would
/// break it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved_quantity: i64,
    pub reorder_level: i64,
    pub max_stock_level: i64,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    /// Creates a new entry with nothing reserved.
    pub fn new(
        product_id: ProductId,
        quantity: i64,
        reorder_level: i64,
        max_stock_level: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            product_id,
            quantity: quantity.max(0),
            reserved_quantity: 0,
            reorder_level,
            max_stock_level,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates an empty entry with the default thresholds.
    pub fn with_defaults(product_id: ProductId) -> Self {
        Self::new(product_id, 0, DEFAULT_REORDER_LEVEL, DEFAULT_MAX_STOCK_LEVEL)
    }

    pub fn available_quantity(&self) -> i64 {
        (self.quantity - self.reserved_quantity).max(0)
    }

    pub fn can_reserve(&self, quantity: i64) -> bool {
        self.available_quantity() >= quantity
    }

    pub fn is_low_stock(&self) -> bool {
        self.available_quantity() <= self.reorder_level
    }

    pub fn stock_status(&self) -> StockStatus {
        let available = self.available_quantity();
        if available == 0 {
            StockStatus::OutOfStock
        } else if available <= self.reorder_level {
            StockStatus::LowStock
        } else {
            StockStatus::InStock
        }
    }

    /// Units missing to get back to the reorder level.
    pub fn stock_deficit(&self) -> i64 {
        (self.reorder_level - self.available_quantity()).max(0)
    }

    /// Units needed to refill up to the maximum stock level.
    pub fn suggested_reorder_quantity(&self) -> i64 {
        (self.max_stock_level - self.quantity).max(0)
    }

    /// Moves `quantity` units from the available pool into the reserved pool.
    pub fn reserve(&mut self, quantity: i64) -> Result<(), Shortfall> {
        if !self.can_reserve(quantity) {
            return Err(Shortfall {
                requested: quantity,
                available: self.available_quantity(),
            });
        }
        self.reserved_quantity += quantity;
        Ok(())
    }

    /// Returns reserved units to the available pool.
    pub fn release_reserved(&mut self, quantity: i64) {
        self.reserved_quantity = (self.reserved_quantity - quantity).max(0);
    }

    /// Converts reserved units into a permanent deduction.
    pub fn commit_reserved(&mut self, quantity: i64) {
        let held = quantity.min(self.reserved_quantity);
        self.reserved_quantity -= held;
        self.quantity = (self.quantity - quantity).max(self.reserved_quantity);
    }

    /// Applies a signed change to the owned quantity.
    ///
    /// Stock already promised to reservations cannot be removed.
    pub fn adjust(&mut self, delta: i64) -> Result<i64, AdjustError> {
        let new_quantity = self
            .quantity
            .checked_add(delta)
            .ok_or(AdjustError::OutOfRange)?;
        if new_quantity < self.reserved_quantity {
            return Err(AdjustError::Shortfall(Shortfall {
                requested: delta.saturating_neg(),
                available: self.available_quantity(),
            }));
        }
        self.quantity = new_quantity;
        Ok(new_quantity)
    }
}
