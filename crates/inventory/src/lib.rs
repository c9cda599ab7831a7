//! Multi-warehouse stock ledger.
//!
//! Movements are appended to an immutable log; batches and per-warehouse
//! positions are derived from it and kept in step under per-key locks. Reads
//! (valuation, reorder alerts, analytics) work on consistent snapshots.
//!
//! No IO beyond optional config loading; persistence and audit storage are
//! left to subscribers of [`events::StockEvent`].

pub mod analytics;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod events;
pub mod ledger;
pub mod movement;
pub mod projection;
pub mod reorder;
pub mod snapshot;
pub mod valuation;


pub use analytics::{
    AbcClass, AbcEntry, DEFAULT_DEAD_STOCK_DAYS, DEFAULT_HOLDING_COST_RATE, InventoryAnalytics,
    MovementStats, ProductTurnover, TREND_WINDOW_DAYS, TransferFlow, WarehouseUtilization, holding_cost,
};
pub use batch::{Batch, BatchLedger, BatchStore, ConsumedLot, ConsumedLots, ConsumptionOrder};
pub use catalog::{Catalog, InMemoryCatalog, Thresholds, ensure_known};
pub use config::{
    CONSUMPTION_ORDER_ENV, ConfigError, DEFAULT_LOCK_TIMEOUT_MS, LOCK_TIMEOUT_ENV, LedgerConfig, NEGATIVE_STOCK_ENV,
    NegativeStockPolicy,
};
pub use events::{MovementRecorded, StockChange, StockEvent};
pub use ledger::MovementLedger;
pub use movement::{
    AdjustmentDirection, Movement, MovementKind, MovementRequest, MovementRoute, ValidatedMovement,
};
pub use projection::{StockPosition, StockProjection};
pub use reorder::{ReorderMonitor, ReorderSuggestion};
pub use snapshot::LedgerSnapshot;
pub use valuation::{CostingMethod, ValuationEngine, ValuationResult, ValuationSummary};
