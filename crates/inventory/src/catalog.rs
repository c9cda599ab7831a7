//! Catalog port: the master-data collaborator the ledger consults.
//!
//! Products, warehouses and their replenishment thresholds are owned elsewhere.
//! The ledger only asks whether an id is known and what the thresholds are.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{LedgerError, LedgerResult, ProductId, StockKey, WarehouseId};

/// Replenishment thresholds for one (product, warehouse) pair.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub reorder_point: Decimal,
    pub safety_stock: Decimal,
}

impl Thresholds {
    pub fn new(reorder_point: Decimal, safety_stock: Decimal) -> Self {
        Self {
            reorder_point,
            safety_stock,
        }
    }

    /// Quantity at or below which a position needs replenishment.
    pub fn trigger_level(&self) -> Decimal {
        self.reorder_point + self.safety_stock
    }
}

pub trait Catalog: Send + Sync {
    fn product_exists(&self, id: ProductId) -> bool;

    fn warehouse_exists(&self, id: WarehouseId) -> bool;

    /// Thresholds for a pair. Pairs without configured thresholds report zeros.
    fn get_thresholds(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Thresholds;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product_exists(&self, id: ProductId) -> bool {
        (**self).product_exists(id)
    }

    fn warehouse_exists(&self, id: WarehouseId) -> bool {
        (**self).warehouse_exists(id)
    }

    fn get_thresholds(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Thresholds {
        (**self).get_thresholds(product_id, warehouse_id)
    }
}

/// Fails with `UnknownKey` unless the catalog knows both halves of the key.
pub fn ensure_known<C: Catalog + ?Sized>(catalog: &C, key: StockKey) -> LedgerResult<()> {
    if !catalog.product_exists(key.product_id) {
        return Err(LedgerError::unknown_product(key.product_id));
    }
    if !catalog.warehouse_exists(key.warehouse_id) {
        return Err(LedgerError::unknown_warehouse(key.warehouse_id));
    }
    Ok(())
}

/// In-memory catalog for tests, tools and embedding.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashSet<ProductId>>,
    warehouses: RwLock<HashSet<WarehouseId>>,
    thresholds: RwLock<HashMap<StockKey, Thresholds>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, id: ProductId) -> &Self {
        self.products.write().insert(id);
        self
    }

    pub fn add_warehouse(&self, id: WarehouseId) -> &Self {
        self.warehouses.write().insert(id);
        self
    }

    pub fn set_thresholds(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        thresholds: Thresholds,
    ) -> &Self {
        self.thresholds
            .write()
            .insert(StockKey::new(product_id, warehouse_id), thresholds);
        self
    }
}

impl Catalog for InMemoryCatalog {
    fn product_exists(&self, id: ProductId) -> bool {
        self.products.read().contains(&id)
    }

    fn warehouse_exists(&self, id: WarehouseId) -> bool {
        self.warehouses.read().contains(&id)
    }

    fn get_thresholds(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Thresholds {
        self.thresholds
            .read()
            .get(&StockKey::new(product_id, warehouse_id))
            .copied()
            .unwrap_or_default()
    }
}
