use std::collections::{BTreeMap, BTreeSet};

use stockledger_core::{MovementId, StockKey, WarehouseId};

use crate::batch::BatchLedger;
use crate::projection::StockPosition;

/// Point-in-time copy of batch and projection state.
///
/// Taken while no movement is mid-commit, so every movement up to `as_of` is
/// fully visible (both legs of a transfer included) and none after it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub as_of: Option<MovementId>,
    pub batches: BTreeMap<StockKey, BatchLedger>,
    pub positions: BTreeMap<StockKey, StockPosition>,
}

impl LedgerSnapshot {
    /// Every key with either batch history or a projection row, ascending.
    pub fn keys(&self) -> BTreeSet<StockKey> {
        self.batches
            .keys()
            .chain(self.positions.keys())
            .copied()
            .collect()
    }

    pub fn position(&self, key: &StockKey) -> Option<&StockPosition> {
        self.positions.get(key)
    }

    pub fn batch_ledger(&self, key: &StockKey) -> Option<&BatchLedger> {
        self.batches.get(key)
    }

    pub fn positions_in(&self, warehouse_id: Option<WarehouseId>) -> impl Iterator<Item = &StockPosition> {
        self.positions
            .values()
            .filter(move |p| warehouse_id.is_none_or(|w| p.warehouse_id == w))
    }
}
