//! Ledger error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{ProductId, WarehouseId};

/// Result type used across the ledger.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Which catalog entry an `UnknownKey` error refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyKind {
    Product,
    Warehouse,
}

impl core::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KeyKind::Product => f.write_str("product"),
            KeyKind::Warehouse => f.write_str("warehouse"),
        }
    }
}

/// Ledger-level error.
///
/// Every mutation error is raised before anything is applied, so the ledger is
/// left in its prior state whichever variant comes back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The request was malformed (missing field, out-of-range value).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The catalog does not know the referenced product or warehouse.
    #[error("unknown {kind}: {id}")]
    UnknownKey { kind: KeyKind, id: String },

    /// Batch consumption came up short and negative stock is forbidden.
    #[error(
        "insufficient stock for product {product_id} in warehouse {warehouse_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product_id: ProductId,
        warehouse_id: WarehouseId,
        requested: Decimal,
        available: Decimal,
    },

    /// The valuation method name is not recognised.
    #[error("unsupported valuation method: {0}")]
    UnsupportedMethod(String),

    /// Lock contention; the caller may retry.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    /// A cancellable read was cancelled between keys.
    #[error("operation cancelled")]
    Cancelled,
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unknown_product(id: ProductId) -> Self {
        Self::UnknownKey {
            kind: KeyKind::Product,
            id: id.to_string(),
        }
    }

    pub fn unknown_warehouse(id: WarehouseId) -> Self {
        Self::UnknownKey {
            kind: KeyKind::Warehouse,
            id: id.to_string(),
        }
    }

    pub fn unsupported_method(name: impl Into<String>) -> Self {
        Self::UnsupportedMethod(name.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::ConcurrencyConflict(msg.into())
    }

    /// Only lock contention is worth retrying unchanged.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict(_))
    }
}
