//! Inventory analytics over a snapshot and the movement log.
//!
//! Movements with an id beyond the snapshot's `as_of` are ignored, so a caller
//! can take a snapshot and then read the log without the two disagreeing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{ProductId, WarehouseId};

use crate::movement::{AdjustmentDirection, Movement, MovementRoute};
use crate::projection::StockPosition;
use crate::snapshot::LedgerSnapshot;
use crate::valuation::{CostingMethod, ValuationEngine};

pub const DEFAULT_DEAD_STOCK_DAYS: i64 = 180;

/// Length of the recent and prior windows compared by [`MovementStats::trend`].
pub const TREND_WINDOW_DAYS: i64 = 30;

/// 0.20 per year.
pub const DEFAULT_HOLDING_COST_RATE: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

const DAYS_PER_YEAR: Decimal = Decimal::from_parts(365, 0, 0, false, 0);
const CLASS_A_SHARE: Decimal = Decimal::from_parts(80, 0, 0, false, 2);
const CLASS_B_SHARE: Decimal = Decimal::from_parts(95, 0, 0, false, 2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTurnover {
    pub product_id: ProductId,
    /// OUT plus downward adjustments, all warehouses.
    pub issued_quantity: Decimal,
    pub on_hand: Decimal,
    /// `issued_quantity / on_hand`; undefined when nothing is on hand.
    pub turnover: Option<Decimal>,
    /// `365 / turnover`; undefined when turnover is zero or undefined.
    pub days_on_hand: Option<Decimal>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AbcClass {
    A,
    B,
    C,
}

impl AbcClass {
    fn for_share(share: Decimal) -> Self {
        if share <= CLASS_A_SHARE {
            AbcClass::A
        } else if share <= CLASS_B_SHARE {
            AbcClass::B
        } else {
            AbcClass::C
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbcEntry {
    pub product_id: ProductId,
    pub inventory_value: Decimal,
    pub cumulative_share: Decimal,
    pub class: AbcClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseUtilization {
    pub warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub capacity: Decimal,
    /// `None` when capacity is not positive.
    pub utilization: Option<Decimal>,
}

/// Daily movement activity for one product.
///
/// Every movement counts its quantity once on the UTC day it happened,
/// whatever its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementStats {
    pub product_id: ProductId,
    /// Days with at least one movement.
    pub active_days: usize,
    /// Mean over active days.
    pub average_daily_quantity: Decimal,
    pub peak_daily_quantity: Decimal,
    /// Moved in the last [`TREND_WINDOW_DAYS`] up to the latest visible movement.
    pub recent_quantity: Decimal,
    /// Moved in the window before that.
    pub prior_quantity: Decimal,
    /// `(recent - prior) / prior` as a fraction; `None` when nothing moved in
    /// the prior window.
    pub trend: Option<Decimal>,
}

/// Transferred quantity along one warehouse pair, all products together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFlow {
    pub from_warehouse_id: WarehouseId,
    pub to_warehouse_id: WarehouseId,
    pub quantity: Decimal,
    pub transfers: usize,
}

/// Annual cost of holding `value` at `annual_rate`.
pub fn holding_cost(value: Decimal, annual_rate: Decimal) -> Decimal {
    value.saturating_mul(annual_rate)
}

fn sum(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, Decimal::saturating_add)
}

pub struct InventoryAnalytics<'a> {
    snapshot: &'a LedgerSnapshot,
    movements: &'a [Movement],
}

impl<'a> InventoryAnalytics<'a> {
    pub fn new(snapshot: &'a LedgerSnapshot, movements: &'a [Movement]) -> Self {
        Self { snapshot, movements }
    }

    fn visible_movements(&self) -> impl Iterator<Item = &'a Movement> {
        let as_of = self.snapshot.as_of;
        self.movements
            .iter()
            .filter(move |m| as_of.is_some_and(|last| m.id <= last))
    }

    pub fn turnover(&self, product_id: ProductId) -> ProductTurnover {
        let issues = self
            .visible_movements()
            .filter(|m| m.product_id == product_id)
            .filter(|m| {
                matches!(
                    m.route,
                    MovementRoute::Out { .. }
                        | MovementRoute::Adjustment {
                            direction: AdjustmentDirection::Decrease,
                            ..
                        }
                )
            })
            .map(|m| m.quantity);
        let issued_quantity = sum(issues);

        let on_hand = sum(
            self.snapshot
                .positions
                .values()
                .filter(|p| p.product_id == product_id)
                .map(|p| p.quantity),
        );

        let turnover = if on_hand > Decimal::ZERO {
            issued_quantity.checked_div(on_hand)
        } else {
            None
        };
        let days_on_hand = turnover.and_then(|t| DAYS_PER_YEAR.checked_div(t));

        ProductTurnover {
            product_id,
            issued_quantity,
            on_hand,
            turnover,
            days_on_hand,
        }
    }

    /// Turnover for every product with a position, ordered by product id.
    pub fn turnover_report(&self) -> Vec<ProductTurnover> {
        let products: BTreeSet<ProductId> = self.snapshot.positions.keys().map(|k| k.product_id).collect();
        products.into_iter().map(|p| self.turnover(p)).collect()
    }

    /// Average, peak and trend of daily movement per product, ordered by
    /// product id. Windows end at the latest visible movement.
    pub fn movement_stats(&self) -> Vec<MovementStats> {
        let Some(latest) = self.visible_movements().map(|m| m.created_at).max() else {
            return Vec::new();
        };
        let recent_start = latest - Duration::days(TREND_WINDOW_DAYS);
        let prior_start = recent_start - Duration::days(TREND_WINDOW_DAYS);

        #[derive(Default)]
        struct Activity {
            daily: BTreeMap<NaiveDate, Decimal>,
            recent: Decimal,
            prior: Decimal,
        }

        let mut by_product: BTreeMap<ProductId, Activity> = BTreeMap::new();
        for movement in self.visible_movements() {
            let activity = by_product.entry(movement.product_id).or_default();
            let day = activity.daily.entry(movement.created_at.date_naive()).or_default();
            *day = day.saturating_add(movement.quantity);

            if movement.created_at >= recent_start {
                activity.recent = activity.recent.saturating_add(movement.quantity);
            } else if movement.created_at >= prior_start {
                activity.prior = activity.prior.saturating_add(movement.quantity);
            }
        }

        by_product
            .into_iter()
            .map(|(product_id, activity)| {
                let active_days = activity.daily.len();
                let total = sum(activity.daily.values().copied());
                MovementStats {
                    product_id,
                    active_days,
                    average_daily_quantity: total / Decimal::from(active_days),
                    peak_daily_quantity: activity.daily.values().copied().max().unwrap_or_default(),
                    recent_quantity: activity.recent,
                    prior_quantity: activity.prior,
                    trend: (activity.prior > Decimal::ZERO)
                        .then(|| (activity.recent - activity.prior).checked_div(activity.prior))
                        .flatten(),
                }
            })
            .collect()
    }

    /// Summed transfers per (from, to) warehouse pair, ordered by the pair.
    pub fn transfer_flows(&self) -> Vec<TransferFlow> {
        let mut flows: BTreeMap<(WarehouseId, WarehouseId), (Decimal, usize)> = BTreeMap::new();
        for movement in self.visible_movements() {
            if let MovementRoute::Transfer {
                from_warehouse_id,
                to_warehouse_id,
            } = movement.route
            {
                let (quantity, transfers) = flows.entry((from_warehouse_id, to_warehouse_id)).or_default();
                *quantity = quantity.saturating_add(movement.quantity);
                *transfers += 1;
            }
        }

        flows
            .into_iter()
            .map(|((from_warehouse_id, to_warehouse_id), (quantity, transfers))| TransferFlow {
                from_warehouse_id,
                to_warehouse_id,
                quantity,
                transfers,
            })
            .collect()
    }

    /// Positions holding stock that has not moved for more than `days` before `as_of`.
    pub fn dead_stock(&self, as_of: DateTime<Utc>, days: i64) -> Vec<StockPosition> {
        let cutoff = as_of - Duration::days(days);
        self.snapshot
            .positions
            .values()
            .filter(|p| p.quantity > Decimal::ZERO)
            .filter(|p| p.last_movement_at.is_none_or(|at| at < cutoff))
            .cloned()
            .collect()
    }

    /// Products ranked by inventory value, highest first.
    pub fn abc_classification(&self, method: CostingMethod) -> Vec<AbcEntry> {
        let mut by_product: BTreeMap<ProductId, Decimal> = BTreeMap::new();
        for result in ValuationEngine::value_inventory(self.snapshot, method) {
            let value = by_product.entry(result.product_id).or_default();
            *value = value.saturating_add(result.total_value);
        }

        let mut ranked: Vec<(ProductId, Decimal)> = by_product.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let total = sum(ranked.iter().map(|(_, v)| *v));
        let denominator = if total > Decimal::ZERO { total } else { Decimal::ONE };

        let mut cumulative = Decimal::ZERO;
        ranked
            .into_iter()
            .map(|(product_id, inventory_value)| {
                cumulative = cumulative.saturating_add(inventory_value);
                let cumulative_share = cumulative.checked_div(denominator).unwrap_or(Decimal::ONE);
                AbcEntry {
                    product_id,
                    inventory_value,
                    cumulative_share,
                    class: AbcClass::for_share(cumulative_share),
                }
            })
            .collect()
    }

    /// Total on-hand quantity per warehouse against a uniform capacity.
    pub fn warehouse_utilization(&self, capacity: Decimal) -> Vec<WarehouseUtilization> {
        let mut totals: BTreeMap<WarehouseId, Decimal> = BTreeMap::new();
        for position in self.snapshot.positions.values() {
            let total = totals.entry(position.warehouse_id).or_default();
            *total = total.saturating_add(position.quantity);
        }

        totals
            .into_iter()
            .map(|(warehouse_id, quantity)| WarehouseUtilization {
                warehouse_id,
                quantity,
                capacity,
                utilization: if capacity > Decimal::ZERO {
                    quantity.checked_div(capacity)
                } else {
                    None
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::catalog::InMemoryCatalog;
    use crate::config::LedgerConfig;
    use crate::ledger::MovementLedger;
    use crate::movement::MovementRequest;

    fn ledger_with(products: &[ProductId], warehouses: &[WarehouseId]) -> MovementLedger<InMemoryCatalog> {
        let catalog = InMemoryCatalog::new();
        for p in products {
            catalog.add_product(*p);
        }
        for w in warehouses {
            catalog.add_warehouse(*w);
        }
        MovementLedger::new(LedgerConfig::default(), catalog)
    }

    #[test]
    fn turnover_counts_issues_but_not_transfers() {
        let p = ProductId::new();
        let (w1, w2) = (WarehouseId::new(), WarehouseId::new());
        let ledger = ledger_with(&[p], &[w1, w2]);

        ledger.append_movement(MovementRequest::receipt(p, w1, dec!(100), dec!(1))).unwrap();
        ledger.append_movement(MovementRequest::issue(p, w1, dec!(30))).unwrap();
        ledger.append_movement(MovementRequest::adjust_down(p, w1, dec!(10))).unwrap();
        ledger.append_movement(MovementRequest::transfer(p, w1, w2, dec!(20))).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        let movements = ledger.movements();
        let t = InventoryAnalytics::new(&snapshot, &movements).turnover(p);

        assert_eq!(t.issued_quantity, dec!(40));
        assert_eq!(t.on_hand, dec!(60));
        assert_eq!(t.turnover, Some(dec!(40) / dec!(60)));
        assert!(t.days_on_hand.is_some());
    }

    #[test]
    fn turnover_is_undefined_without_stock() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let ledger = ledger_with(&[p], &[w]);
        ledger.append_movement(MovementRequest::receipt(p, w, dec!(5), dec!(1))).unwrap();
        ledger.append_movement(MovementRequest::issue(p, w, dec!(5))).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        let movements = ledger.movements();
        let t = InventoryAnalytics::new(&snapshot, &movements).turnover(p);
        assert_eq!(t.turnover, None);
        assert_eq!(t.days_on_hand, None);
    }

    #[test]
    fn movements_after_the_snapshot_are_ignored() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let ledger = ledger_with(&[p], &[w]);
        ledger.append_movement(MovementRequest::receipt(p, w, dec!(10), dec!(1))).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        ledger.append_movement(MovementRequest::issue(p, w, dec!(4))).unwrap();
        let movements = ledger.movements();

        let t = InventoryAnalytics::new(&snapshot, &movements).turnover(p);
        assert_eq!(t.issued_quantity, dec!(0));
        assert_eq!(t.days_on_hand, None);
    }

    #[test]
    fn dead_stock_uses_last_movement_age() {
        let (p1, p2) = (ProductId::new(), ProductId::new());
        let w = WarehouseId::new();
        let ledger = ledger_with(&[p1, p2], &[w]);
        let now = Utc::now();

        ledger
            .append_movement(MovementRequest::receipt(p1, w, dec!(3), dec!(1)).at(now - Duration::days(200)))
            .unwrap();
        ledger
            .append_movement(MovementRequest::receipt(p2, w, dec!(3), dec!(1)).at(now - Duration::days(20)))
            .unwrap();

        let snapshot = ledger.snapshot().unwrap();
        let analytics = InventoryAnalytics::new(&snapshot, &[]);
        let dead = analytics.dead_stock(now, DEFAULT_DEAD_STOCK_DAYS);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].product_id, p1);

        assert_eq!(analytics.dead_stock(now, 10).len(), 2);
    }

    #[test]
    fn abc_classes_follow_cumulative_value_share() {
        let products: Vec<ProductId> = (0..3).map(|_| ProductId::new()).collect();
        let w = WarehouseId::new();
        let ledger = ledger_with(&products, &[w]);

        for (p, value) in products.iter().zip([dec!(80), dec!(15), dec!(5)]) {
            ledger.append_movement(MovementRequest::receipt(*p, w, value, dec!(1))).unwrap();
        }

        let snapshot = ledger.snapshot().unwrap();
        let abc = InventoryAnalytics::new(&snapshot, &[]).abc_classification(CostingMethod::Fifo);

        let classes: Vec<(ProductId, AbcClass)> = abc.iter().map(|e| (e.product_id, e.class)).collect();
        assert_eq!(
            classes,
            vec![
                (products[0], AbcClass::A),
                (products[1], AbcClass::B),
                (products[2], AbcClass::C),
            ]
        );
        assert_eq!(abc[2].cumulative_share, dec!(1));
    }

    #[test]
    fn turnover_report_lists_each_product_once() {
        let (p1, p2) = (ProductId::new(), ProductId::new());
        let (w1, w2) = (WarehouseId::new(), WarehouseId::new());
        let ledger = ledger_with(&[p1, p2], &[w1, w2]);

        ledger.append_movement(MovementRequest::receipt(p1, w1, dec!(10), dec!(1))).unwrap();
        ledger.append_movement(MovementRequest::receipt(p1, w2, dec!(10), dec!(1))).unwrap();
        ledger.append_movement(MovementRequest::issue(p1, w2, dec!(5))).unwrap();
        ledger.append_movement(MovementRequest::receipt(p2, w1, dec!(4), dec!(1))).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        let movements = ledger.movements();
        let report = InventoryAnalytics::new(&snapshot, &movements).turnover_report();

        assert_eq!(report.len(), 2);
        let first = report.iter().find(|t| t.product_id == p1).unwrap();
        assert_eq!(first.on_hand, dec!(15));
        assert_eq!(first.issued_quantity, dec!(5));
        let second = report.iter().find(|t| t.product_id == p2).unwrap();
        assert_eq!(second.turnover, Some(dec!(0)));
        assert_eq!(second.days_on_hand, None);
    }

    fn day(n: i64, hour: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_000 + n) + Duration::hours(hour)
    }

    #[test]
    fn movement_stats_average_peak_and_trend() {
        let (p1, p2) = (ProductId::new(), ProductId::new());
        let w = WarehouseId::new();
        let ledger = ledger_with(&[p1, p2], &[w]);

        for request in [
            MovementRequest::receipt(p1, w, dec!(10), dec!(1)).at(day(0, 10)),
            MovementRequest::issue(p1, w, dec!(4)).at(day(0, 15)),
            MovementRequest::receipt(p2, w, dec!(7), dec!(1)).at(day(0, 16)),
            MovementRequest::receipt(p1, w, dec!(2), dec!(1)).at(day(20, 9)),
            MovementRequest::receipt(p1, w, dec!(6), dec!(1)).at(day(40, 12)),
            MovementRequest::issue(p1, w, dec!(3)).at(day(65, 8)),
            MovementRequest::receipt(p1, w, dec!(9), dec!(1)).at(day(70, 12)),
        ] {
            ledger.append_movement(request).unwrap();
        }

        let snapshot = ledger.snapshot().unwrap();
        let movements = ledger.movements();
        let stats = InventoryAnalytics::new(&snapshot, &movements).movement_stats();
        assert_eq!(stats.len(), 2);

        let busy = stats.iter().find(|s| s.product_id == p1).unwrap();
        assert_eq!(busy.active_days, 5);
        assert_eq!(busy.average_daily_quantity, dec!(6.8));
        assert_eq!(busy.peak_daily_quantity, dec!(14));
        // The recent window starts exactly 30 days before the last movement.
        assert_eq!(busy.recent_quantity, dec!(18));
        assert_eq!(busy.prior_quantity, dec!(2));
        assert_eq!(busy.trend, Some(dec!(8)));

        let quiet = stats.iter().find(|s| s.product_id == p2).unwrap();
        assert_eq!(quiet.average_daily_quantity, dec!(7));
        assert_eq!(quiet.recent_quantity, dec!(0));
        assert_eq!(quiet.trend, None);
    }

    #[test]
    fn movement_stats_are_empty_without_visible_movements() {
        let snapshot = LedgerSnapshot::default();
        let movements: Vec<Movement> = Vec::new();
        assert!(InventoryAnalytics::new(&snapshot, &movements).movement_stats().is_empty());
    }

    #[test]
    fn transfer_flows_sum_per_warehouse_pair() {
        let (p1, p2) = (ProductId::new(), ProductId::new());
        let (w1, w2, w3) = (WarehouseId::new(), WarehouseId::new(), WarehouseId::new());
        let ledger = ledger_with(&[p1, p2], &[w1, w2, w3]);

        ledger.append_movement(MovementRequest::receipt(p1, w1, dec!(100), dec!(1))).unwrap();
        ledger.append_movement(MovementRequest::receipt(p2, w1, dec!(10), dec!(1))).unwrap();
        ledger.append_movement(MovementRequest::transfer(p1, w1, w2, dec!(10))).unwrap();
        ledger.append_movement(MovementRequest::transfer(p1, w1, w2, dec!(5))).unwrap();
        ledger.append_movement(MovementRequest::transfer(p2, w1, w2, dec!(2))).unwrap();
        ledger.append_movement(MovementRequest::transfer(p1, w2, w3, dec!(3))).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        ledger.append_movement(MovementRequest::transfer(p1, w3, w1, dec!(1))).unwrap();
        let movements = ledger.movements();

        let flows = InventoryAnalytics::new(&snapshot, &movements).transfer_flows();
        assert_eq!(flows.len(), 2);

        let flow = |from, to| {
            flows
                .iter()
                .find(|f| f.from_warehouse_id == from && f.to_warehouse_id == to)
                .map(|f| (f.quantity, f.transfers))
        };
        assert_eq!(flow(w1, w2), Some((dec!(17), 3)));
        assert_eq!(flow(w2, w3), Some((dec!(3), 1)));
        assert_eq!(flow(w3, w1), None);
    }

    #[test]
    fn utilization_and_holding_cost() {
        let p = ProductId::new();
        let w = WarehouseId::new();
        let ledger = ledger_with(&[p], &[w]);
        ledger.append_movement(MovementRequest::receipt(p, w, dec!(250), dec!(2))).unwrap();

        let snapshot = ledger.snapshot().unwrap();
        let analytics = InventoryAnalytics::new(&snapshot, &[]);

        let usage = analytics.warehouse_utilization(dec!(1000));
        assert_eq!(usage[0].utilization, Some(dec!(0.25)));
        assert_eq!(analytics.warehouse_utilization(dec!(0))[0].utilization, None);

        assert_eq!(holding_cost(dec!(500), DEFAULT_HOLDING_COST_RATE), dec!(100));
    }
}
