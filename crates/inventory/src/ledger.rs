//! Movement Ledger: the append-only log and the single write path.
//!
//! `append_movement` is atomic per movement. Everything that can fail
//! (validation, catalog lookup, lock acquisition, the negative-stock check) runs
//! before the first mutation; after that the log, batches and projection are
//! updated together while the movement's key locks are held.
//!
//! ## Locking
//!
//! - One mutex per (product, warehouse) key, created on first use. A movement
//!   takes the locks for every key it touches in ascending key order, so two
//!   transfers in opposite directions cannot deadlock.
//! - A commit gate: writers hold it shared, [`MovementLedger::snapshot`] holds it
//!   exclusively. Readers therefore never see one leg of a transfer without the
//!   other.
//! - Every wait is bounded by `lock_timeout_ms` and ends in a retriable
//!   `ConcurrencyConflict`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use stockledger_core::{LedgerError, LedgerResult, MovementId, ProductId, StockKey, WarehouseId};
use stockledger_events::{EventBus, EventEnvelope, NullEventBus};

use crate::batch::{Batch, BatchStore, ConsumedLots};
use crate::catalog::{Catalog, ensure_known};
use crate::config::LedgerConfig;
use crate::events::{MovementRecorded, StockChange, StockEvent};
use crate::movement::{AdjustmentDirection, Movement, MovementRequest, MovementRoute, ValidatedMovement};
use crate::projection::{StockPosition, StockProjection};
use crate::reorder::{ReorderMonitor, ReorderSuggestion};
use crate::snapshot::LedgerSnapshot;
use crate::valuation::{CostingMethod, ValuationEngine, ValuationResult};

/// Consumption planned at a movement's source key.
struct SourcePlan {
    key: StockKey,
    lots: ConsumedLots,
}

pub struct MovementLedger<C, B = NullEventBus> {
    config: LedgerConfig,
    catalog: C,
    bus: B,
    log: Mutex<Vec<Movement>>,
    batches: BatchStore,
    projection: StockProjection,
    key_locks: Mutex<HashMap<StockKey, Arc<Mutex<()>>>>,
    commit_gate: RwLock<()>,
}

impl<C: Catalog> MovementLedger<C, NullEventBus> {
    /// Ledger without change notifications.
    pub fn new(config: LedgerConfig, catalog: C) -> Self {
        Self::with_bus(config, catalog, NullEventBus)
    }
}

impl<C, B> MovementLedger<C, B>
where
    C: Catalog,
    B: EventBus<EventEnvelope<StockEvent>>,
{
    pub fn with_bus(config: LedgerConfig, catalog: C, bus: B) -> Self {
        Self {
            config,
            catalog,
            bus,
            log: Mutex::new(Vec::new()),
            batches: BatchStore::new(),
            projection: StockProjection::new(),
            key_locks: Mutex::new(HashMap::new()),
            commit_gate: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Validate, append and apply one movement. Returns its id.
    ///
    /// On error nothing is appended and no batch or position changes.
    pub fn append_movement(&self, request: MovementRequest) -> LedgerResult<MovementId> {
        let validated = request.validate().inspect_err(|e| {
            debug!(error = %e, product_id = %request.product_id, "movement rejected");
        })?;

        let keys = validated.keys();
        for key in &keys {
            ensure_known(&self.catalog, *key)?;
        }

        let movement = self.with_key_locks(&keys, || self.commit(validated))?;

        info!(
            movement_id = %movement.id,
            kind = %movement.kind(),
            product_id = %movement.product_id,
            quantity = %movement.quantity,
            "movement recorded"
        );
        Ok(movement.id)
    }

    /// Current position for a known pair. Pairs nothing has moved through yet
    /// report zero with the catalog's thresholds.
    pub fn get_position(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> LedgerResult<StockPosition> {
        let key = StockKey::new(product_id, warehouse_id);
        ensure_known(&self.catalog, key)?;

        let thresholds = self.catalog.get_thresholds(product_id, warehouse_id);
        Ok(self
            .projection
            .get(key)
            .map(|p| p.with_thresholds(thresholds))
            .unwrap_or_else(|| StockPosition::empty(key, thresholds)))
    }

    /// Earmark `quantity` of available stock. Does not move anything.
    pub fn reserve(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
    ) -> LedgerResult<StockPosition> {
        let key = StockKey::new(product_id, warehouse_id);
        ensure_known(&self.catalog, key)?;
        let position = self.with_key_locks(&[key], || self.projection.reserve(key, quantity))?;
        debug!(key = %key, quantity = %quantity, reserved = %position.reserved_quantity, "stock reserved");
        Ok(position)
    }

    pub fn release(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
    ) -> LedgerResult<StockPosition> {
        let key = StockKey::new(product_id, warehouse_id);
        ensure_known(&self.catalog, key)?;
        let position = self.with_key_locks(&[key], || self.projection.release(key, quantity))?;
        debug!(key = %key, quantity = %quantity, reserved = %position.reserved_quantity, "reservation released");
        Ok(position)
    }

    /// Batch history for one key, in `(received_at, id)` order.
    pub fn batches(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Vec<Batch> {
        self.batches.batches(StockKey::new(product_id, warehouse_id))
    }

    /// Every appended movement in append order.
    pub fn movements(&self) -> Vec<Movement> {
        self.log.lock().clone()
    }

    /// Movements appended after `after`, for consumers catching up.
    pub fn movements_since(&self, after: MovementId) -> Vec<Movement> {
        let log = self.log.lock();
        let start = usize::try_from(after.get()).unwrap_or(usize::MAX).min(log.len());
        log[start..].to_vec()
    }

    pub fn last_movement_id(&self) -> Option<MovementId> {
        self.log.lock().last().map(|m| m.id)
    }

    /// Consistent copy of batches and positions.
    pub fn snapshot(&self) -> LedgerResult<LedgerSnapshot> {
        let _gate = self
            .commit_gate
            .try_write_for(self.config.lock_timeout())
            .ok_or_else(|| {
                warn!("timed out waiting for in-flight movements before snapshot");
                LedgerError::conflict("timed out waiting for a consistent snapshot")
            })?;

        Ok(LedgerSnapshot {
            as_of: self.last_movement_id(),
            batches: self.batches.snapshot(),
            positions: self.projection.snapshot(),
        })
    }

    pub fn value_inventory(&self, method: CostingMethod) -> LedgerResult<Vec<ValuationResult>> {
        let snapshot = self.snapshot()?;
        Ok(ValuationEngine::value_inventory(&snapshot, method))
    }

    /// Parses `method` first, so an unknown name fails with `UnsupportedMethod`
    /// without touching ledger state.
    pub fn value_inventory_by_name(&self, method: &str) -> LedgerResult<Vec<ValuationResult>> {
        let method: CostingMethod = method.parse()?;
        self.value_inventory(method)
    }

    pub fn value_inventory_cancellable(
        &self,
        method: CostingMethod,
        cancel: &AtomicBool,
    ) -> LedgerResult<Vec<ValuationResult>> {
        let snapshot = self.snapshot()?;
        ValuationEngine::value_inventory_cancellable(&snapshot, method, cancel)
    }

    /// Value a single pair; `None` when it holds nothing.
    pub fn value_position(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        method: CostingMethod,
    ) -> LedgerResult<Option<ValuationResult>> {
        let key = StockKey::new(product_id, warehouse_id);
        ensure_known(&self.catalog, key)?;
        self.with_key_locks(&[key], || {
            let ledger = self.batches.ledger(key);
            let position = self.projection.get(key);
            Ok(ValuationEngine::value_key(key, ledger.as_ref(), position.as_ref(), method))
        })
    }

    /// Positions at or below `reorder_point + safety_stock`, optionally for one warehouse.
    pub fn below_threshold(&self, warehouse_id: Option<WarehouseId>) -> LedgerResult<Vec<StockPosition>> {
        let snapshot = self.snapshot()?;
        Ok(ReorderMonitor::below_threshold(&snapshot, &self.catalog, warehouse_id))
    }

    pub fn reorder_suggestions(
        &self,
        warehouse_id: Option<WarehouseId>,
    ) -> LedgerResult<Vec<ReorderSuggestion>> {
        let snapshot = self.snapshot()?;
        Ok(ReorderMonitor::suggestions(&snapshot, &self.catalog, warehouse_id))
    }

    /// Re-append a previously exported log. Business timestamps are preserved, so
    /// a fresh ledger ends with the same ids, batches and positions. Stops at the
    /// first movement that fails.
    pub fn replay<'a>(
        &self,
        movements: impl IntoIterator<Item = &'a Movement>,
    ) -> LedgerResult<Vec<MovementId>> {
        let ids = movements
            .into_iter()
            .map(|m| self.append_movement(m.to_request()))
            .collect::<LedgerResult<Vec<_>>>()?;
        info!(count = ids.len(), "replayed movements");
        Ok(ids)
    }

    /// Keys whose live quantity differs from a rebuild of the log. Empty when the
    /// projection is consistent.
    pub fn audit_projection(&self) -> LedgerResult<Vec<StockKey>> {
        let _gate = self
            .commit_gate
            .try_write_for(self.config.lock_timeout())
            .ok_or_else(|| LedgerError::conflict("timed out waiting to audit the projection"))?;

        let rebuilt = StockProjection::from_movements(self.log.lock().iter(), &self.catalog).snapshot();
        let live = self.projection.snapshot();

        let drift: Vec<StockKey> = live
            .keys()
            .chain(rebuilt.keys())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|key| {
                let quantity = |rows: &BTreeMap<StockKey, StockPosition>| {
                    rows.get(key).map(|p| p.quantity).unwrap_or_default()
                };
                quantity(&live) != quantity(&rebuilt)
            })
            .collect();

        if !drift.is_empty() {
            warn!(keys = drift.len(), "projection drifted from movement log");
        }
        Ok(drift)
    }

    /// Run `f` while holding the commit gate (shared) and the given key locks.
    fn with_key_locks<T>(
        &self,
        keys: &[StockKey],
        f: impl FnOnce() -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let timeout = self.config.lock_timeout();

        let mut ordered = keys.to_vec();
        ordered.sort();
        ordered.dedup();

        let _gate = self.commit_gate.try_read_for(timeout).ok_or_else(|| {
            warn!("timed out waiting for commit gate");
            LedgerError::conflict("timed out waiting for commit gate")
        })?;

        let cells: Vec<Arc<Mutex<()>>> = {
            let mut table = self.key_locks.lock();
            ordered
                .iter()
                .map(|key| Arc::clone(table.entry(*key).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(cells.len());
        for (key, cell) in ordered.iter().zip(&cells) {
            match cell.try_lock_for(timeout) {
                Some(guard) => guards.push(guard),
                None => {
                    warn!(key = %key, timeout_ms = self.config.lock_timeout_ms, "key lock wait timed out");
                    return Err(LedgerError::conflict(format!(
                        "timed out waiting for lock on {key}"
                    )));
                }
            }
        }

        let result = f();
        drop(guards);
        result
    }

    /// Apply a validated movement. Caller holds the movement's key locks.
    fn commit(&self, validated: ValidatedMovement) -> LedgerResult<Movement> {
        let product_id = validated.product_id;
        let order = self.config.consumption_order;

        let source = validated.route.source().map(|warehouse_id| {
            let key = StockKey::new(product_id, warehouse_id);
            SourcePlan {
                key,
                lots: self.batches.plan(key, validated.quantity, order),
            }
        });

        if let Some(plan) = source.as_ref().filter(|p| p.lots.is_short()) {
            if !self.config.negative_stock.permits_shortfall() {
                debug!(key = %plan.key, shortfall = %plan.lots.shortfall, "rejecting movement on insufficient stock");
                return Err(LedgerError::InsufficientStock {
                    product_id,
                    warehouse_id: plan.key.warehouse_id,
                    requested: validated.quantity,
                    available: plan.lots.covered_quantity(),
                });
            }
            warn!(
                key = %plan.key,
                requested = %validated.quantity,
                shortfall = %plan.lots.shortfall,
                "consumption exceeds open batches, position goes negative"
            );
        }

        let inbound_cost = self.inbound_cost(&validated, source.as_ref())?;
        let deltas = validated.signed_deltas();

        // Every derived total must fit before the log is touched.
        if let Some(plan) = &source {
            self.batches.check_commit(plan.key, &plan.lots)?;
        }
        if let Some(warehouse_id) = validated.route.destination() {
            self.batches.check_receive(
                StockKey::new(product_id, warehouse_id),
                validated.quantity,
                inbound_cost,
            )?;
        }
        self.projection.check_deltas(&deltas)?;

        let at = validated.occurred_at.unwrap_or_else(Utc::now);

        // Nothing below can fail.
        let movement = self.record(validated, at);

        if let Some(plan) = &source {
            self.batches.commit(plan.key, &plan.lots);
        }
        if let Some(warehouse_id) = movement.route.destination() {
            self.batches.receive(
                StockKey::new(product_id, warehouse_id),
                movement.id,
                movement.quantity,
                inbound_cost,
                at,
            );
        }

        let changes: Vec<StockChange> = deltas
            .into_iter()
            .map(|(key, delta)| {
                let thresholds = self.catalog.get_thresholds(key.product_id, key.warehouse_id);
                let row = self.projection.apply_delta(key, delta, thresholds, at);
                StockChange {
                    warehouse_id: key.warehouse_id,
                    delta,
                    quantity: row.quantity,
                }
            })
            .collect();

        let shortfall = source.map(|p| p.lots.shortfall).unwrap_or_default();
        self.notify(&movement, changes, shortfall, at);
        Ok(movement)
    }

    /// Unit cost of the batch a movement opens at its destination.
    ///
    /// A transfer's cost is the consumed value divided by the quantity at full
    /// `Decimal` precision. `quantity * cost` can then differ from the consumed
    /// value in the 28th significant digit; valuations carry that residue.
    fn inbound_cost(&self, validated: &ValidatedMovement, source: Option<&SourcePlan>) -> LedgerResult<Decimal> {
        let cost = match validated.route {
            MovementRoute::In { .. } => validated.unit_cost.unwrap_or_default(),
            MovementRoute::Transfer { .. } => match source {
                Some(plan) => {
                    // Shortfall travels at the source's last known cost.
                    let fallback = self.batches.last_unit_cost(plan.key).unwrap_or_default();
                    plan.lots
                        .total_cost()
                        .and_then(|covered| covered.checked_add(plan.lots.shortfall.checked_mul(fallback)?))
                        .and_then(|total| total.checked_div(validated.quantity))
                        .ok_or_else(|| {
                            LedgerError::validation(format!(
                                "cost of transferring {} from {} overflows",
                                validated.quantity, plan.key
                            ))
                        })?
                }
                None => Decimal::ZERO,
            },
            MovementRoute::Adjustment {
                warehouse_id,
                direction: AdjustmentDirection::Increase,
            } => validated.unit_cost.unwrap_or_else(|| {
                self.batches
                    .reference_cost(StockKey::new(validated.product_id, warehouse_id))
            }),
            _ => Decimal::ZERO,
        };
        Ok(cost)
    }

    fn record(&self, validated: ValidatedMovement, at: DateTime<Utc>) -> Movement {
        let mut log = self.log.lock();
        let id = MovementId(log.len() as u64 + 1);
        let movement = validated.into_movement(id, at);
        log.push(movement.clone());
        movement
    }

    /// Publish while the key locks are still held so per-key notifications
    /// arrive in commit order. A failed publish does not undo the commit.
    fn notify(&self, movement: &Movement, changes: Vec<StockChange>, shortfall: Decimal, at: DateTime<Utc>) {
        let event = StockEvent::MovementRecorded(MovementRecorded {
            movement_id: movement.id,
            kind: movement.kind(),
            product_id: movement.product_id,
            reference: movement.reference.clone(),
            changes,
            shortfall,
            occurred_at: at,
        });

        if let Err(err) = self.bus.publish(event.into_envelope()) {
            warn!(movement_id = %movement.id, error = ?err, "failed to publish movement notification");
        }
    }
}
