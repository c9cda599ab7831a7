//! Reorder Monitor: positions at or below `reorder_point + safety_stock`.
//!
//! Thresholds are re-read from the catalog at query time, so a threshold change
//! takes effect immediately even for keys that have not moved since.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::WarehouseId;

use crate::catalog::Catalog;
use crate::projection::StockPosition;
use crate::snapshot::LedgerSnapshot;

/// A position under its trigger level and how much would bring it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderSuggestion {
    pub position: StockPosition,
    /// `reorder_point + safety_stock - quantity`.
    pub shortage: Decimal,
}

pub struct ReorderMonitor;

impl ReorderMonitor {
    /// Positions whose quantity is at or below the trigger level, ordered by key.
    pub fn below_threshold<C>(
        snapshot: &LedgerSnapshot,
        catalog: &C,
        warehouse_id: Option<WarehouseId>,
    ) -> Vec<StockPosition>
    where
        C: Catalog + ?Sized,
    {
        snapshot
            .positions_in(warehouse_id)
            .map(|p| {
                p.clone()
                    .with_thresholds(catalog.get_thresholds(p.product_id, p.warehouse_id))
            })
            .filter(StockPosition::is_below_threshold)
            .collect()
    }

    /// Same selection as [`ReorderMonitor::below_threshold`], largest shortage first.
    pub fn suggestions<C>(
        snapshot: &LedgerSnapshot,
        catalog: &C,
        warehouse_id: Option<WarehouseId>,
    ) -> Vec<ReorderSuggestion>
    where
        C: Catalog + ?Sized,
    {
        let mut suggestions: Vec<ReorderSuggestion> =
            Self::below_threshold(snapshot, catalog, warehouse_id)
                .into_iter()
                .map(|position| ReorderSuggestion {
                    shortage: position.shortage(),
                    position,
                })
                .collect();
        suggestions.sort_by(|a, b| {
            b.shortage
                .cmp(&a.shortage)
                .then_with(|| a.position.key().cmp(&b.position.key()))
        });
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::{ProductId, StockKey};

    use crate::catalog::{InMemoryCatalog, Thresholds};

    fn snapshot_with(rows: &[(StockKey, Decimal)]) -> LedgerSnapshot {
        let mut snapshot = LedgerSnapshot::default();
        for (key, quantity) in rows {
            let mut p = StockPosition::empty(*key, Thresholds::default());
            p.quantity = *quantity;
            snapshot.positions.insert(*key, p);
        }
        snapshot
    }

    #[test]
    fn boundary_equality_is_reported() {
        let catalog = InMemoryCatalog::new();
        let p = ProductId::new();
        let w = WarehouseId::new();
        let key = StockKey::new(p, w);
        catalog.set_thresholds(p, w, Thresholds::new(dec!(10), dec!(5)));

        let at_boundary = snapshot_with(&[(key, dec!(15))]);
        let hits = ReorderMonitor::below_threshold(&at_boundary, &catalog, None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].reorder_point, dec!(10));
        assert_eq!(hits[0].safety_stock, dec!(5));

        let above = snapshot_with(&[(key, dec!(16))]);
        assert!(ReorderMonitor::below_threshold(&above, &catalog, None).is_empty());
    }

    #[test]
    fn thresholds_come_from_the_catalog_at_query_time() {
        let catalog = InMemoryCatalog::new();
        let p = ProductId::new();
        let w = WarehouseId::new();
        let snapshot = snapshot_with(&[(StockKey::new(p, w), dec!(40))]);

        assert!(ReorderMonitor::below_threshold(&snapshot, &catalog, None).is_empty());

        catalog.set_thresholds(p, w, Thresholds::new(dec!(50), dec!(0)));
        assert_eq!(ReorderMonitor::below_threshold(&snapshot, &catalog, None).len(), 1);
    }

    #[test]
    fn warehouse_filter_and_shortage_ordering() {
        let catalog = InMemoryCatalog::new();
        let p = ProductId::new();
        let w1 = WarehouseId::new();
        let w2 = WarehouseId::new();
        catalog.set_thresholds(p, w1, Thresholds::new(dec!(20), dec!(0)));
        catalog.set_thresholds(p, w2, Thresholds::new(dec!(20), dec!(0)));

        let snapshot = snapshot_with(&[
            (StockKey::new(p, w1), dec!(15)),
            (StockKey::new(p, w2), dec!(-5)),
        ]);

        let only_w1 = ReorderMonitor::below_threshold(&snapshot, &catalog, Some(w1));
        assert_eq!(only_w1.len(), 1);
        assert_eq!(only_w1[0].warehouse_id, w1);

        let suggestions = ReorderMonitor::suggestions(&snapshot, &catalog, None);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].position.warehouse_id, w2);
        assert_eq!(suggestions[0].shortage, dec!(25));
        assert_eq!(suggestions[1].shortage, dec!(5));
    }
}
