//! Movements: immutable facts in the stock ledger.
//!
//! Callers submit a flat [`MovementRequest`]; validation turns it into a typed
//! [`MovementRoute`] so the rest of the ledger never has to re-check which
//! warehouse fields are present for which kind.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, MovementId, ProductId, StockKey, WarehouseId};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    In,
    Out,
    Transfer,
    Adjustment,
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            MovementKind::In => "IN",
            MovementKind::Out => "OUT",
            MovementKind::Transfer => "TRANSFER",
            MovementKind::Adjustment => "ADJUSTMENT",
        };
        f.write_str(s)
    }
}

impl core::str::FromStr for MovementKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "IN" => Ok(MovementKind::In),
            "OUT" => Ok(MovementKind::Out),
            "TRANSFER" => Ok(MovementKind::Transfer),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            other => Err(LedgerError::validation(format!("unknown movement type '{other}'"))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
}

/// Where a movement takes stock from and/or puts it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementRoute {
    In {
        warehouse_id: WarehouseId,
    },
    Out {
        warehouse_id: WarehouseId,
    },
    Transfer {
        from_warehouse_id: WarehouseId,
        to_warehouse_id: WarehouseId,
    },
    Adjustment {
        warehouse_id: WarehouseId,
        direction: AdjustmentDirection,
    },
}

impl MovementRoute {
    pub fn kind(&self) -> MovementKind {
        match self {
            MovementRoute::In { .. } => MovementKind::In,
            MovementRoute::Out { .. } => MovementKind::Out,
            MovementRoute::Transfer { .. } => MovementKind::Transfer,
            MovementRoute::Adjustment { .. } => MovementKind::Adjustment,
        }
    }

    /// Warehouse whose batches are consumed, if the movement is outbound there.
    pub fn source(&self) -> Option<WarehouseId> {
        match *self {
            MovementRoute::Out { warehouse_id } => Some(warehouse_id),
            MovementRoute::Transfer {
                from_warehouse_id, ..
            } => Some(from_warehouse_id),
            MovementRoute::Adjustment {
                warehouse_id,
                direction: AdjustmentDirection::Decrease,
            } => Some(warehouse_id),
            _ => None,
        }
    }

    /// Warehouse that receives a new batch, if the movement is inbound there.
    pub fn destination(&self) -> Option<WarehouseId> {
        match *self {
            MovementRoute::In { warehouse_id } => Some(warehouse_id),
            MovementRoute::Transfer {
                to_warehouse_id, ..
            } => Some(to_warehouse_id),
            MovementRoute::Adjustment {
                warehouse_id,
                direction: AdjustmentDirection::Increase,
            } => Some(warehouse_id),
            _ => None,
        }
    }

    /// Keys touched by the movement, ascending and deduplicated (lock order).
    pub fn keys(&self, product_id: ProductId) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = self
            .source()
            .into_iter()
            .chain(self.destination())
            .map(|w| StockKey::new(product_id, w))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Signed quantity change per key for `quantity` moving along this route.
    pub fn signed_deltas(&self, product_id: ProductId, quantity: Decimal) -> Vec<(StockKey, Decimal)> {
        let mut deltas = Vec::with_capacity(2);
        if let Some(source) = self.source() {
            deltas.push((StockKey::new(product_id, source), -quantity));
        }
        if let Some(destination) = self.destination() {
            deltas.push((StockKey::new(product_id, destination), quantity));
        }
        deltas
    }
}

/// A request to append a movement.
///
/// - `IN` and `OUT` use `warehouse_id`.
/// - `TRANSFER` uses both `from_warehouse_id` and `to_warehouse_id`.
/// - `ADJUSTMENT` uses exactly one of them: `to_` for an increase, `from_` for a decrease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    #[serde(rename = "type")]
    pub kind: MovementKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse_id: Option<WarehouseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_warehouse_id: Option<WarehouseId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_cost: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Business time. Defaults to append time; set when replaying a historic log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl MovementRequest {
    fn bare(product_id: ProductId, kind: MovementKind, quantity: Decimal) -> Self {
        Self {
            product_id,
            kind,
            warehouse_id: None,
            from_warehouse_id: None,
            to_warehouse_id: None,
            quantity,
            unit_cost: None,
            reference: None,
            occurred_at: None,
        }
    }

    pub fn receipt(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        quantity: Decimal,
        unit_cost: Decimal,
    ) -> Self {
        Self {
            warehouse_id: Some(warehouse_id),
            unit_cost: Some(unit_cost),
            ..Self::bare(product_id, MovementKind::In, quantity)
        }
    }

    pub fn issue(product_id: ProductId, warehouse_id: WarehouseId, quantity: Decimal) -> Self {
        Self {
            warehouse_id: Some(warehouse_id),
            ..Self::bare(product_id, MovementKind::Out, quantity)
        }
    }

    pub fn transfer(
        product_id: ProductId,
        from_warehouse_id: WarehouseId,
        to_warehouse_id: WarehouseId,
        quantity: Decimal,
    ) -> Self {
        Self {
            from_warehouse_id: Some(from_warehouse_id),
            to_warehouse_id: Some(to_warehouse_id),
            ..Self::bare(product_id, MovementKind::Transfer, quantity)
        }
    }

    pub fn adjust_up(product_id: ProductId, warehouse_id: WarehouseId, quantity: Decimal) -> Self {
        Self {
            to_warehouse_id: Some(warehouse_id),
            ..Self::bare(product_id, MovementKind::Adjustment, quantity)
        }
    }

    pub fn adjust_down(product_id: ProductId, warehouse_id: WarehouseId, quantity: Decimal) -> Self {
        Self {
            from_warehouse_id: Some(warehouse_id),
            ..Self::bare(product_id, MovementKind::Adjustment, quantity)
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    /// Check field presence and ranges. Pure; the catalog is consulted separately.
    pub fn validate(&self) -> LedgerResult<ValidatedMovement> {
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::validation(format!(
                "quantity must be positive (got {})",
                self.quantity
            )));
        }
        if let Some(cost) = self.unit_cost {
            if cost < Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "unit_cost must be non-negative (got {cost})"
                )));
            }
        }

        let route = match self.kind {
            MovementKind::In => {
                self.forbid_transfer_fields()?;
                if self.unit_cost.is_none() {
                    return Err(LedgerError::validation("IN requires unit_cost"));
                }
                MovementRoute::In {
                    warehouse_id: self.require_warehouse()?,
                }
            }
            MovementKind::Out => {
                self.forbid_transfer_fields()?;
                self.forbid_unit_cost()?;
                MovementRoute::Out {
                    warehouse_id: self.require_warehouse()?,
                }
            }
            MovementKind::Transfer => {
                self.forbid_warehouse_field()?;
                self.forbid_unit_cost()?;
                let (from, to) = match (self.from_warehouse_id, self.to_warehouse_id) {
                    (Some(from), Some(to)) => (from, to),
                    _ => {
                        return Err(LedgerError::validation(
                            "TRANSFER requires from_warehouse_id and to_warehouse_id",
                        ));
                    }
                };
                if from == to {
                    return Err(LedgerError::validation(
                        "TRANSFER source and destination must differ",
                    ));
                }
                MovementRoute::Transfer {
                    from_warehouse_id: from,
                    to_warehouse_id: to,
                }
            }
            MovementKind::Adjustment => {
                self.forbid_warehouse_field()?;
                match (self.from_warehouse_id, self.to_warehouse_id) {
                    (None, Some(warehouse_id)) => MovementRoute::Adjustment {
                        warehouse_id,
                        direction: AdjustmentDirection::Increase,
                    },
                    (Some(warehouse_id), None) => {
                        self.forbid_unit_cost()?;
                        MovementRoute::Adjustment {
                            warehouse_id,
                            direction: AdjustmentDirection::Decrease,
                        }
                    }
                    _ => {
                        return Err(LedgerError::validation(
                            "ADJUSTMENT requires exactly one of from_warehouse_id / to_warehouse_id",
                        ));
                    }
                }
            }
        };

        let reference = self
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_owned);

        Ok(ValidatedMovement {
            product_id: self.product_id,
            route,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            reference,
            occurred_at: self.occurred_at,
        })
    }

    fn require_warehouse(&self) -> LedgerResult<WarehouseId> {
        self.warehouse_id
            .ok_or_else(|| LedgerError::validation(format!("{} requires warehouse_id", self.kind)))
    }

    fn forbid_transfer_fields(&self) -> LedgerResult<()> {
        if self.from_warehouse_id.is_some() || self.to_warehouse_id.is_some() {
            return Err(LedgerError::validation(format!(
                "{} does not accept from_warehouse_id / to_warehouse_id",
                self.kind
            )));
        }
        Ok(())
    }

    fn forbid_warehouse_field(&self) -> LedgerResult<()> {
        if self.warehouse_id.is_some() {
            return Err(LedgerError::validation(format!(
                "{} does not accept warehouse_id",
                self.kind
            )));
        }
        Ok(())
    }

    fn forbid_unit_cost(&self) -> LedgerResult<()> {
        if self.unit_cost.is_some() {
            return Err(LedgerError::validation(format!(
                "unit_cost is only accepted on receipts and upward adjustments ({})",
                self.kind
            )));
        }
        Ok(())
    }
}

/// A request that passed validation but has not been appended yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMovement {
    pub product_id: ProductId,
    pub route: MovementRoute,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl ValidatedMovement {
    pub fn keys(&self) -> Vec<StockKey> {
        self.route.keys(self.product_id)
    }

    pub fn signed_deltas(&self) -> Vec<(StockKey, Decimal)> {
        self.route.signed_deltas(self.product_id, self.quantity)
    }

    pub(crate) fn into_movement(self, id: MovementId, created_at: DateTime<Utc>) -> Movement {
        Movement {
            id,
            product_id: self.product_id,
            route: self.route,
            quantity: self.quantity,
            unit_cost: self.unit_cost,
            reference: self.reference,
            created_at,
        }
    }
}

/// An appended movement. Never mutated; corrections are new movements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub product_id: ProductId,
    #[serde(flatten)]
    pub route: MovementRoute,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    pub fn kind(&self) -> MovementKind {
        self.route.kind()
    }

    /// Signed quantity change per key. This is the conservation rule: a key's
    /// projected quantity is the sum of these deltas over every movement.
    pub fn signed_deltas(&self) -> Vec<(StockKey, Decimal)> {
        self.route.signed_deltas(self.product_id, self.quantity)
    }

    /// Rebuild the request that produced this movement (for replay).
    pub fn to_request(&self) -> MovementRequest {
        let mut request = MovementRequest::bare(self.product_id, self.kind(), self.quantity);
        match self.route {
            MovementRoute::In { warehouse_id } | MovementRoute::Out { warehouse_id } => {
                request.warehouse_id = Some(warehouse_id);
            }
            MovementRoute::Transfer {
                from_warehouse_id,
                to_warehouse_id,
            } => {
                request.from_warehouse_id = Some(from_warehouse_id);
                request.to_warehouse_id = Some(to_warehouse_id);
            }
            MovementRoute::Adjustment {
                warehouse_id,
                direction: AdjustmentDirection::Increase,
            } => request.to_warehouse_id = Some(warehouse_id),
            MovementRoute::Adjustment {
                warehouse_id,
                direction: AdjustmentDirection::Decrease,
            } => request.from_warehouse_id = Some(warehouse_id),
        }
        request.unit_cost = self.unit_cost;
        request.reference = self.reference.clone();
        request.occurred_at = Some(self.created_at);
        request
    }
}
