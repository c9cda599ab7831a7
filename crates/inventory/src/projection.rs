//! Stock Projection: current quantity per (product, warehouse).
//!
//! The projection is derived state. The movement log is the source of truth and
//! [`StockProjection::from_movements`] rebuilds the same rows from it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, ProductId, StockKey, WarehouseId};

use crate::catalog::{Catalog, Thresholds};
use crate::movement::Movement;

/// Read model: one row per (product, warehouse) touched by a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockPosition {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub reserved_quantity: Decimal,
    pub reorder_point: Decimal,
    pub safety_stock: Decimal,
    pub last_movement_at: Option<DateTime<Utc>>,
}

impl StockPosition {
    /// Zero row for a pair nothing has moved through yet.
    pub fn empty(key: StockKey, thresholds: Thresholds) -> Self {
        Self {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            quantity: Decimal::ZERO,
            reserved_quantity: Decimal::ZERO,
            reorder_point: thresholds.reorder_point,
            safety_stock: thresholds.safety_stock,
            last_movement_at: None,
        }
    }

    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds::new(self.reorder_point, self.safety_stock)
    }

    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.reorder_point = thresholds.reorder_point;
        self.safety_stock = thresholds.safety_stock;
        self
    }

    /// On hand minus reserved.
    pub fn available_quantity(&self) -> Decimal {
        self.quantity.saturating_sub(self.reserved_quantity)
    }

    /// Boundary equality counts as below threshold.
    pub fn is_below_threshold(&self) -> bool {
        self.quantity <= self.thresholds().trigger_level()
    }

    /// Quantity needed to climb back to the trigger level (zero when above it).
    pub fn shortage(&self) -> Decimal {
        self.thresholds()
            .trigger_level()
            .saturating_sub(self.quantity)
            .max(Decimal::ZERO)
    }
}

#[derive(Debug, Default)]
pub struct StockProjection {
    rows: RwLock<BTreeMap<StockKey, StockPosition>>,
}

impl StockProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild rows by folding every movement's signed deltas.
    pub fn from_movements<'a, C>(movements: impl IntoIterator<Item = &'a Movement>, catalog: &C) -> Self
    where
        C: Catalog + ?Sized,
    {
        let projection = Self::new();
        for movement in movements {
            for (key, delta) in movement.signed_deltas() {
                let thresholds = catalog.get_thresholds(key.product_id, key.warehouse_id);
                projection.apply_delta(key, delta, thresholds, movement.created_at);
            }
        }
        projection
    }

    /// Fails when applying `deltas` would overflow a row's quantity.
    pub fn check_deltas(&self, deltas: &[(StockKey, Decimal)]) -> LedgerResult<()> {
        let rows = self.rows.read();
        for (key, delta) in deltas {
            let quantity = rows.get(key).map(|row| row.quantity).unwrap_or_default();
            if quantity.checked_add(*delta).is_none() {
                return Err(LedgerError::validation(format!(
                    "quantity at {key} overflows when applying {delta}"
                )));
            }
        }
        Ok(())
    }

    /// Add `delta` to a row, creating it lazily. Returns the updated row.
    pub fn apply_delta(
        &self,
        key: StockKey,
        delta: Decimal,
        thresholds: Thresholds,
        at: DateTime<Utc>,
    ) -> StockPosition {
        let mut rows = self.rows.write();
        let row = rows
            .entry(key)
            .or_insert_with(|| StockPosition::empty(key, thresholds));

        row.quantity = row.quantity.saturating_add(delta);
        row.reorder_point = thresholds.reorder_point;
        row.safety_stock = thresholds.safety_stock;
        row.last_movement_at = Some(row.last_movement_at.map_or(at, |prev| prev.max(at)));
        row.clone()
    }

    pub fn get(&self, key: StockKey) -> Option<StockPosition> {
        self.rows.read().get(&key).cloned()
    }

    /// Earmark stock for an order without moving it.
    pub fn reserve(&self, key: StockKey, quantity: Decimal) -> LedgerResult<StockPosition> {
        ensure_positive(quantity)?;
        let mut rows = self.rows.write();
        let row = rows.get_mut(&key).ok_or_else(|| LedgerError::InsufficientStock {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            requested: quantity,
            available: Decimal::ZERO,
        })?;

        let available = row.available_quantity();
        if quantity > available {
            return Err(LedgerError::InsufficientStock {
                product_id: key.product_id,
                warehouse_id: key.warehouse_id,
                requested: quantity,
                available: available.max(Decimal::ZERO),
            });
        }
        row.reserved_quantity += quantity;
        Ok(row.clone())
    }

    pub fn release(&self, key: StockKey, quantity: Decimal) -> LedgerResult<StockPosition> {
        ensure_positive(quantity)?;
        let mut rows = self.rows.write();
        let row = rows
            .get_mut(&key)
            .filter(|row| quantity <= row.reserved_quantity)
            .ok_or_else(|| {
                LedgerError::validation(format!(
                    "cannot release {quantity}: exceeds reserved quantity for {key}"
                ))
            })?;
        row.reserved_quantity -= quantity;
        Ok(row.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<StockKey, StockPosition> {
        self.rows.read().clone()
    }
}

fn ensure_positive(quantity: Decimal) -> LedgerResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::validation(format!(
            "quantity must be positive (got {quantity})"
        )));
    }
    Ok(())
}
