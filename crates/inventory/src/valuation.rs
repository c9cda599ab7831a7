//! Valuation Engine: quantity and value per (product, warehouse).
//!
//! Read-only over a [`LedgerSnapshot`]. Because `remaining_quantity` already
//! reflects real consumption history, FIFO and LIFO both value what remains by
//! summing `remaining_quantity * unit_cost` over open batches (walked in the
//! method's order). The order only decides which cost a future issue picks up.
//!
//! Weighted average uses every receipt to date, consumed batches included:
//! `received_cost * quantity / received_quantity`, multiplied before dividing.
//!
//! Stock that no batch covers (a negative position under a permissive policy) is
//! valued at the key's last known unit cost and reported, not hidden.

use std::sync::atomic::{AtomicBool, Ordering};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, ProductId, StockKey, WarehouseId};

use crate::batch::{BatchLedger, ConsumptionOrder};
use crate::projection::StockPosition;
use crate::snapshot::LedgerSnapshot;

/// Scale used for reported unit costs.
pub const UNIT_COST_SCALE: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostingMethod {
    Fifo,
    Lifo,
    #[serde(rename = "avg", alias = "average", alias = "weighted_average")]
    WeightedAverage,
}

impl core::fmt::Display for CostingMethod {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CostingMethod::Fifo => f.write_str("FIFO"),
            CostingMethod::Lifo => f.write_str("LIFO"),
            CostingMethod::WeightedAverage => f.write_str("AVG"),
        }
    }
}

impl core::str::FromStr for CostingMethod {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(CostingMethod::Fifo),
            "lifo" => Ok(CostingMethod::Lifo),
            "avg" | "average" | "weighted_average" => Ok(CostingMethod::WeightedAverage),
            _ => Err(LedgerError::unsupported_method(s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationResult {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub method: CostingMethod,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
    /// `total_value / total_quantity`, or the key's reference cost when quantity is zero.
    pub unit_cost: Option<Decimal>,
    /// Cumulative consumption no batch covered.
    pub uncovered_quantity: Decimal,
}

impl ValuationResult {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationSummary {
    pub method: CostingMethod,
    pub positions: usize,
    pub total_quantity: Decimal,
    pub total_value: Decimal,
    /// Keys whose quantity is negative.
    pub negative_positions: usize,
}

pub struct ValuationEngine;

impl ValuationEngine {
    /// One result per key with remaining batch quantity > 0 or non-zero on-hand
    /// quantity, ordered by key.
    pub fn value_inventory(snapshot: &LedgerSnapshot, method: CostingMethod) -> Vec<ValuationResult> {
        snapshot
            .keys()
            .into_iter()
            .filter_map(|key| {
                Self::value_key(
                    key,
                    snapshot.batch_ledger(&key),
                    snapshot.position(&key),
                    method,
                )
            })
            .collect()
    }

    /// Same as [`ValuationEngine::value_inventory`], checking `cancel` between keys.
    pub fn value_inventory_cancellable(
        snapshot: &LedgerSnapshot,
        method: CostingMethod,
        cancel: &AtomicBool,
    ) -> LedgerResult<Vec<ValuationResult>> {
        let mut results = Vec::new();
        for key in snapshot.keys() {
            if cancel.load(Ordering::Relaxed) {
                return Err(LedgerError::Cancelled);
            }
            if let Some(result) =
                Self::value_key(key, snapshot.batch_ledger(&key), snapshot.position(&key), method)
            {
                results.push(result);
            }
        }
        Ok(results)
    }

    pub fn value_key(
        key: StockKey,
        batches: Option<&BatchLedger>,
        position: Option<&StockPosition>,
        method: CostingMethod,
    ) -> Option<ValuationResult> {
        let remaining = batches.map(BatchLedger::remaining_quantity).unwrap_or_default();
        let quantity = position.map(|p| p.quantity).unwrap_or(remaining);

        if remaining <= Decimal::ZERO && quantity.is_zero() {
            return None;
        }

        let total_value = match method {
            CostingMethod::Fifo => Self::lot_value(batches, quantity, ConsumptionOrder::Fifo),
            CostingMethod::Lifo => Self::lot_value(batches, quantity, ConsumptionOrder::Lifo),
            CostingMethod::WeightedAverage => batches
                .filter(|l| !l.received_quantity().is_zero())
                .and_then(|l| {
                    l.received_cost()
                        .checked_mul(quantity)
                        .and_then(|v| v.checked_div(l.received_quantity()))
                        .or_else(|| l.average_unit_cost().map(|c| c.saturating_mul(quantity)))
                })
                .unwrap_or_default(),
        };

        let unit_cost = if quantity.is_zero() {
            batches.map(BatchLedger::reference_cost)
        } else {
            total_value.checked_div(quantity)
        }
        .map(|c| c.round_dp(UNIT_COST_SCALE));

        Some(ValuationResult {
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            method,
            total_quantity: quantity,
            total_value,
            unit_cost,
            uncovered_quantity: batches.map(BatchLedger::uncovered_quantity).unwrap_or_default(),
        })
    }

    pub fn summarize(method: CostingMethod, results: &[ValuationResult]) -> ValuationSummary {
        ValuationSummary {
            method,
            positions: results.len(),
            total_quantity: results
                .iter()
                .fold(Decimal::ZERO, |acc, r| acc.saturating_add(r.total_quantity)),
            total_value: results
                .iter()
                .fold(Decimal::ZERO, |acc, r| acc.saturating_add(r.total_value)),
            negative_positions: results
                .iter()
                .filter(|r| r.total_quantity < Decimal::ZERO)
                .count(),
        }
    }

    fn lot_value(batches: Option<&BatchLedger>, quantity: Decimal, order: ConsumptionOrder) -> Decimal {
        let Some(ledger) = batches else {
            return Decimal::ZERO;
        };
        let lots: Decimal = ledger
            .open_batches(order)
            .into_iter()
            .map(|b| b.remaining_value())
            .sum();

        // On-hand quantity not matched by open batches (negative after a shortfall).
        let uncovered = quantity.saturating_sub(ledger.remaining_quantity());
        lots.saturating_add(uncovered.saturating_mul(ledger.last_unit_cost().unwrap_or_default()))
    }
}
