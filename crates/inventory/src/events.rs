//! Change notifications published after each committed movement.
//!
//! The ledger does not format or store audit entries; an audit collaborator
//! subscribes to these and persists them however it likes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{MovementId, ProductId, WarehouseId};
use stockledger_events::{Event, EventEnvelope};

use crate::movement::MovementKind;

/// Quantity change applied to one warehouse, with the resulting on-hand quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub warehouse_id: WarehouseId,
    pub delta: Decimal,
    pub quantity: Decimal,
}

/// Event: MovementRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecorded {
    pub movement_id: MovementId,
    pub kind: MovementKind,
    pub product_id: ProductId,
    pub reference: Option<String>,
    pub changes: Vec<StockChange>,
    /// Quantity consumed beyond available batches (zero unless negative stock is allowed).
    pub shortfall: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockEvent {
    MovementRecorded(MovementRecorded),
}

impl StockEvent {
    pub fn movement_id(&self) -> MovementId {
        match self {
            StockEvent::MovementRecorded(e) => e.movement_id,
        }
    }

    pub fn into_envelope(self) -> EventEnvelope<StockEvent> {
        let seq = self.movement_id().get();
        EventEnvelope::wrap(seq, self)
    }
}

impl Event for StockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockEvent::MovementRecorded(_) => "stock.movement.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockEvent::MovementRecorded(e) => e.occurred_at,
        }
    }
}
