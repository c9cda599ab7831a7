//! Batch Store: cost lots per (product, warehouse) and their consumption.
//!
//! Consumption is split in two:
//! - [`BatchLedger::plan`] walks open batches in FIFO or LIFO order and returns the
//!   lots it would take plus any shortfall, without touching state.
//! - [`BatchLedger::commit`] applies a plan.
//!
//! The movement ledger checks the negative-stock policy between the two, so a
//! rejected movement never leaves a batch half-consumed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use stockledger_core::{BatchId, LedgerError, LedgerResult, MovementId, ProductId, StockKey, WarehouseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumptionOrder {
    /// Oldest `received_at` first.
    #[default]
    Fifo,
    /// Newest `received_at` first.
    Lifo,
}

impl core::fmt::Display for ConsumptionOrder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ConsumptionOrder::Fifo => f.write_str("fifo"),
            ConsumptionOrder::Lifo => f.write_str("lifo"),
        }
    }
}

impl core::str::FromStr for ConsumptionOrder {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(ConsumptionOrder::Fifo),
            "lifo" => Ok(ConsumptionOrder::Lifo),
            other => Err(LedgerError::validation(format!(
                "unknown consumption order '{other}' (expected fifo or lifo)"
            ))),
        }
    }
}

/// A receipt lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub source_movement_id: MovementId,
    pub received_quantity: Decimal,
    /// `0 <= remaining_quantity <= received_quantity`, only ever decreasing.
    pub remaining_quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_at: DateTime<Utc>,
}

impl Batch {
    pub fn key(&self) -> StockKey {
        StockKey::new(self.product_id, self.warehouse_id)
    }

    pub fn is_open(&self) -> bool {
        self.remaining_quantity > Decimal::ZERO
    }

    pub fn remaining_value(&self) -> Decimal {
        self.remaining_quantity * self.unit_cost
    }

    fn sort_key(&self) -> (DateTime<Utc>, BatchId) {
        (self.received_at, self.id)
    }
}

/// One slice taken from one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedLot {
    pub batch_id: BatchId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

/// Result of consuming a quantity from a key's batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedLots {
    pub lots: Vec<ConsumedLot>,
    /// Requested quantity that no open batch could cover.
    pub shortfall: Decimal,
}

impl ConsumedLots {
    pub fn covered_quantity(&self) -> Decimal {
        self.lots.iter().map(|l| l.quantity).sum()
    }

    /// Cost of the covered part; `None` if it does not fit in a `Decimal`.
    pub fn total_cost(&self) -> Option<Decimal> {
        self.lots.iter().try_fold(Decimal::ZERO, |total, lot| {
            total.checked_add(lot.quantity.checked_mul(lot.unit_cost)?)
        })
    }

    pub fn is_short(&self) -> bool {
        self.shortfall > Decimal::ZERO
    }

    /// Weighted unit cost of the covered part; `None` when nothing was covered.
    pub fn weighted_unit_cost(&self) -> Option<Decimal> {
        self.total_cost()?.checked_div(self.covered_quantity())
    }
}

/// Batch history and running cost totals for one key.
///
/// Batches are kept sorted by `(received_at, id)`; fully consumed batches stay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLedger {
    batches: Vec<Batch>,
    received_quantity: Decimal,
    received_cost: Decimal,
    uncovered_quantity: Decimal,
    last_unit_cost: Option<Decimal>,
}

impl BatchLedger {
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.batches.iter().map(|b| b.remaining_quantity).sum()
    }

    /// Quantity received over the key's whole history.
    pub fn received_quantity(&self) -> Decimal {
        self.received_quantity
    }

    /// Cost received over the key's whole history.
    pub fn received_cost(&self) -> Decimal {
        self.received_cost
    }

    /// Cumulative consumption that exceeded available batches.
    pub fn uncovered_quantity(&self) -> Decimal {
        self.uncovered_quantity
    }

    /// Unit cost of the most recent receipt.
    pub fn last_unit_cost(&self) -> Option<Decimal> {
        self.last_unit_cost
    }

    /// Moving-average cost across every receipt to date, consumed batches included.
    pub fn average_unit_cost(&self) -> Option<Decimal> {
        self.received_cost.checked_div(self.received_quantity)
    }

    /// Received quantity and cost after a receipt of `quantity @ unit_cost`,
    /// or `None` when either total would overflow.
    pub fn totals_after_receipt(&self, quantity: Decimal, unit_cost: Decimal) -> Option<(Decimal, Decimal)> {
        let cost = quantity.checked_mul(unit_cost)?;
        Some((
            self.received_quantity.checked_add(quantity)?,
            self.received_cost.checked_add(cost)?,
        ))
    }

    /// Best available cost for stock that has no batch of its own.
    pub fn reference_cost(&self) -> Decimal {
        self.average_unit_cost()
            .or(self.last_unit_cost)
            .unwrap_or(Decimal::ZERO)
    }

    /// Open batches in consumption order: `received_at` ascending for FIFO,
    /// descending for LIFO. Equal timestamps fall back to batch id ascending in
    /// both cases, which makes the order total and replay-stable.
    pub fn open_batches(&self, order: ConsumptionOrder) -> Vec<&Batch> {
        let mut open: Vec<&Batch> = self.batches.iter().filter(|b| b.is_open()).collect();
        if order == ConsumptionOrder::Lifo {
            open.sort_by(|a, b| b.received_at.cmp(&a.received_at).then(a.id.cmp(&b.id)));
        }
        open
    }

    /// Work out which lots `quantity` would consume. Does not mutate.
    pub fn plan(&self, quantity: Decimal, order: ConsumptionOrder) -> ConsumedLots {
        let mut outstanding = quantity;
        let mut lots = Vec::new();

        for batch in self.open_batches(order) {
            if outstanding <= Decimal::ZERO {
                break;
            }
            let take = batch.remaining_quantity.min(outstanding);
            lots.push(ConsumedLot {
                batch_id: batch.id,
                quantity: take,
                unit_cost: batch.unit_cost,
            });
            outstanding -= take;
        }

        ConsumedLots {
            lots,
            shortfall: outstanding.max(Decimal::ZERO),
        }
    }

    /// Apply a plan produced by [`BatchLedger::plan`] against this same state.
    pub fn commit(&mut self, consumed: &ConsumedLots) {
        for lot in &consumed.lots {
            if let Some(batch) = self.batches.iter_mut().find(|b| b.id == lot.batch_id) {
                debug_assert!(lot.quantity <= batch.remaining_quantity);
                let take = lot.quantity.min(batch.remaining_quantity);
                batch.remaining_quantity -= take;
                debug!(
                    batch_id = %batch.id,
                    taken = %take,
                    remaining = %batch.remaining_quantity,
                    "consumed batch"
                );
            }
        }
        self.uncovered_quantity = self.uncovered_quantity.saturating_add(consumed.shortfall);
    }

    /// Totals saturate; [`BatchStore::check_receive`] rejects receipts that
    /// would overflow before anything is recorded.
    pub fn receive(&mut self, batch: Batch) {
        let cost = batch.received_quantity.saturating_mul(batch.unit_cost);
        self.received_quantity = self.received_quantity.saturating_add(batch.received_quantity);
        self.received_cost = self.received_cost.saturating_add(cost);
        self.last_unit_cost = Some(batch.unit_cost);

        let pos = self
            .batches
            .partition_point(|b| b.sort_key() <= batch.sort_key());
        self.batches.insert(pos, batch);
    }
}

/// Owns every key's [`BatchLedger`].
///
/// The store does not serialize read-modify-write cycles on its own; callers
/// hold the key lock between `plan` and `commit`.
#[derive(Debug)]
pub struct BatchStore {
    ledgers: RwLock<BTreeMap<StockKey, BatchLedger>>,
    next_id: AtomicU64,
}

impl Default for BatchStore {
    fn default() -> Self {
        Self {
            ledgers: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl BatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new batch with `remaining_quantity = quantity`.
    pub fn receive(
        &self,
        key: StockKey,
        source_movement_id: MovementId,
        quantity: Decimal,
        unit_cost: Decimal,
        received_at: DateTime<Utc>,
    ) -> BatchId {
        let id = BatchId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let batch = Batch {
            id,
            product_id: key.product_id,
            warehouse_id: key.warehouse_id,
            source_movement_id,
            received_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost,
            received_at,
        };
        debug!(batch_id = %id, key = %key, quantity = %quantity, unit_cost = %unit_cost, "opened batch");
        self.ledgers.write().entry(key).or_default().receive(batch);
        id
    }

    /// Fails when a receipt of `quantity @ unit_cost` would overflow the key's
    /// running cost totals.
    pub fn check_receive(&self, key: StockKey, quantity: Decimal, unit_cost: Decimal) -> LedgerResult<()> {
        let ledgers = self.ledgers.read();
        let totals = match ledgers.get(&key) {
            Some(ledger) => ledger.totals_after_receipt(quantity, unit_cost),
            None => BatchLedger::default().totals_after_receipt(quantity, unit_cost),
        };
        totals.map(|_| ()).ok_or_else(|| {
            LedgerError::validation(format!(
                "receiving {quantity} at {unit_cost} overflows the cost totals for {key}"
            ))
        })
    }

    /// Fails when committing `consumed` would overflow the key's uncovered quantity.
    pub fn check_commit(&self, key: StockKey, consumed: &ConsumedLots) -> LedgerResult<()> {
        let uncovered = self
            .ledgers
            .read()
            .get(&key)
            .map(BatchLedger::uncovered_quantity)
            .unwrap_or_default();
        uncovered
            .checked_add(consumed.shortfall)
            .map(|_| ())
            .ok_or_else(|| LedgerError::validation(format!("shortfall at {key} overflows")))
    }

    pub fn plan(&self, key: StockKey, quantity: Decimal, order: ConsumptionOrder) -> ConsumedLots {
        match self.ledgers.read().get(&key) {
            Some(ledger) => ledger.plan(quantity, order),
            None => ConsumedLots {
                lots: Vec::new(),
                shortfall: quantity,
            },
        }
    }

    pub fn commit(&self, key: StockKey, consumed: &ConsumedLots) {
        self.ledgers.write().entry(key).or_default().commit(consumed);
    }

    /// Plan and commit in one step. Returns the partial consumption plus the
    /// shortfall when batches run out; deciding whether that is an error is up
    /// to the caller.
    pub fn consume(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
        order: ConsumptionOrder,
    ) -> ConsumedLots {
        let key = StockKey::new(product_id, warehouse_id);
        let mut ledgers = self.ledgers.write();
        let ledger = ledgers.entry(key).or_default();
        let consumed = ledger.plan(quantity, order);
        ledger.commit(&consumed);
        consumed
    }

    /// Copy of one key's ledger.
    pub fn ledger(&self, key: StockKey) -> Option<BatchLedger> {
        self.ledgers.read().get(&key).cloned()
    }

    pub fn batches(&self, key: StockKey) -> Vec<Batch> {
        self.ledgers
            .read()
            .get(&key)
            .map(|l| l.batches.clone())
            .unwrap_or_default()
    }

    pub fn reference_cost(&self, key: StockKey) -> Decimal {
        self.ledgers
            .read()
            .get(&key)
            .map(BatchLedger::reference_cost)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn last_unit_cost(&self, key: StockKey) -> Option<Decimal> {
        self.ledgers.read().get(&key).and_then(|l| l.last_unit_cost)
    }

    /// Copy of every key's ledger, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<StockKey, BatchLedger> {
        self.ledgers.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new())
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[test]
    fn fifo_takes_oldest_batch_first() {
        let store = BatchStore::new();
        let k = key();
        let b1 = store.receive(k, MovementId(1), dec!(100), dec!(5.00), t(1));
        let b2 = store.receive(k, MovementId(2), dec!(50), dec!(6.00), t(2));

        let consumed = store.consume(k.product_id, k.warehouse_id, dec!(60), ConsumptionOrder::Fifo);

        assert_eq!(
            consumed.lots,
            vec![ConsumedLot {
                batch_id: b1,
                quantity: dec!(60),
                unit_cost: dec!(5.00)
            }]
        );
        assert!(!consumed.is_short());

        let batches = store.batches(k);
        assert_eq!(batches[0].id, b1);
        assert_eq!(batches[0].remaining_quantity, dec!(40));
        assert_eq!(batches[1].id, b2);
        assert_eq!(batches[1].remaining_quantity, dec!(50));
    }

    #[test]
    fn lifo_takes_newest_batch_first_and_spills_over() {
        let store = BatchStore::new();
        let k = key();
        let b1 = store.receive(k, MovementId(1), dec!(100), dec!(5), t(1));
        let b2 = store.receive(k, MovementId(2), dec!(50), dec!(6), t(2));

        let consumed = store.consume(k.product_id, k.warehouse_id, dec!(60), ConsumptionOrder::Lifo);

        assert_eq!(consumed.lots.len(), 2);
        assert_eq!((consumed.lots[0].batch_id, consumed.lots[0].quantity), (b2, dec!(50)));
        assert_eq!((consumed.lots[1].batch_id, consumed.lots[1].quantity), (b1, dec!(10)));
        assert_eq!(consumed.total_cost(), Some(dec!(350)));
    }

    #[test]
    fn equal_timestamps_break_ties_on_batch_id() {
        let store = BatchStore::new();
        let k = key();
        let first = store.receive(k, MovementId(1), dec!(1), dec!(1), t(5));
        let second = store.receive(k, MovementId(2), dec!(1), dec!(2), t(5));

        let fifo = store.plan(k, dec!(1), ConsumptionOrder::Fifo);
        assert_eq!(fifo.lots[0].batch_id, first);

        let lifo = store.plan(k, dec!(2), ConsumptionOrder::Lifo);
        assert_eq!(lifo.lots[0].batch_id, first);
        assert_eq!(lifo.lots[1].batch_id, second);
    }

    #[test]
    fn backdated_receipt_is_consumed_first_under_fifo() {
        let store = BatchStore::new();
        let k = key();
        store.receive(k, MovementId(1), dec!(1), dec!(1), t(10));
        let older = store.receive(k, MovementId(2), dec!(1), dec!(2), t(3));

        let plan = store.plan(k, dec!(1), ConsumptionOrder::Fifo);
        assert_eq!(plan.lots[0].batch_id, older);
    }

    #[test]
    fn exhausted_batches_report_shortfall_and_are_retained() {
        let store = BatchStore::new();
        let k = key();
        store.receive(k, MovementId(1), dec!(10), dec!(2), t(1));

        let consumed = store.consume(k.product_id, k.warehouse_id, dec!(15), ConsumptionOrder::Fifo);

        assert_eq!(consumed.covered_quantity(), dec!(10));
        assert_eq!(consumed.shortfall, dec!(5));

        let ledger = store.ledger(k).unwrap();
        assert_eq!(ledger.batches().len(), 1);
        assert_eq!(ledger.batches()[0].remaining_quantity, dec!(0));
        assert_eq!(ledger.uncovered_quantity(), dec!(5));
    }

    #[test]
    fn plan_does_not_mutate() {
        let store = BatchStore::new();
        let k = key();
        store.receive(k, MovementId(1), dec!(10), dec!(2), t(1));

        let before = store.ledger(k);
        let _ = store.plan(k, dec!(7), ConsumptionOrder::Fifo);
        assert_eq!(store.ledger(k), before);
    }

    #[test]
    fn consuming_unknown_key_is_all_shortfall() {
        let store = BatchStore::new();
        let plan = store.plan(key(), dec!(3), ConsumptionOrder::Fifo);
        assert!(plan.lots.is_empty());
        assert_eq!(plan.shortfall, dec!(3));
        assert_eq!(plan.weighted_unit_cost(), None);
    }

    #[test]
    fn average_cost_includes_consumed_batches() {
        let mut ledger = BatchLedger::default();
        let k = key();
        for (id, qty, cost) in [(1, dec!(100), dec!(5)), (2, dec!(50), dec!(6))] {
            ledger.receive(Batch {
                id: BatchId(id),
                product_id: k.product_id,
                warehouse_id: k.warehouse_id,
                source_movement_id: MovementId(id),
                received_quantity: qty,
                remaining_quantity: qty,
                unit_cost: cost,
                received_at: t(id as i64),
            });
        }
        let plan = ledger.plan(dec!(100), ConsumptionOrder::Fifo);
        ledger.commit(&plan);

        assert_eq!(ledger.received_cost(), dec!(800));
        assert_eq!(ledger.received_quantity(), dec!(150));
        assert_eq!(ledger.last_unit_cost(), Some(dec!(6)));
        assert_eq!(ledger.remaining_quantity(), dec!(50));
    }

    #[test]
    fn receipt_that_overflows_cost_totals_is_refused() {
        let store = BatchStore::new();
        let k = key();
        let huge = dec!(1_000_000_000_000_000);

        assert!(matches!(
            store.check_receive(k, huge, huge),
            Err(LedgerError::Validation(_))
        ));
        assert!(store.check_receive(k, dec!(10), dec!(2)).is_ok());

        store.receive(k, MovementId(1), Decimal::MAX, Decimal::ZERO, t(1));
        assert!(store.check_receive(k, dec!(1), dec!(0)).is_err());
        assert_eq!(store.ledger(k).unwrap().received_quantity(), Decimal::MAX);
    }

    #[test]
    fn total_cost_reports_overflow_as_none() {
        let lots = ConsumedLots {
            lots: vec![
                ConsumedLot {
                    batch_id: BatchId(1),
                    quantity: Decimal::MAX,
                    unit_cost: dec!(2),
                },
            ],
            shortfall: Decimal::ZERO,
        };
        assert_eq!(lots.total_cost(), None);
        assert_eq!(lots.weighted_unit_cost(), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: remaining quantity stays within [0, received] and covered +
        /// shortfall always equals what was asked for.
        #[test]
        fn consumption_respects_batch_bounds(
            ops in prop::collection::vec((any::<bool>(), 1u32..500u32, 0u32..10_000u32), 1..40),
            lifo in any::<bool>(),
        ) {
            let store = BatchStore::new();
            let k = key();
            let order = if lifo { ConsumptionOrder::Lifo } else { ConsumptionOrder::Fifo };

            for (i, (is_receipt, qty, cents)) in ops.into_iter().enumerate() {
                let qty = Decimal::from(qty);
                if is_receipt {
                    store.receive(k, MovementId(i as u64 + 1), qty, Decimal::new(cents as i64, 2), t(i as i64));
                } else {
                    let consumed = store.consume(k.product_id, k.warehouse_id, qty, order);
                    prop_assert_eq!(consumed.covered_quantity() + consumed.shortfall, qty);
                }

                for b in store.batches(k) {
                    prop_assert!(b.remaining_quantity >= Decimal::ZERO);
                    prop_assert!(b.remaining_quantity <= b.received_quantity);
                }
            }
        }
    }
}
