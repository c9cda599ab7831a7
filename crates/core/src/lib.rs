//! `stockledger-core`: identifiers and the error taxonomy shared by the ledger crates.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{KeyKind, LedgerError, LedgerResult};
pub use id::{BatchId, MovementId, ProductId, StockKey, WarehouseId};
