//! Stock-taking (physical count) sessions.
//!
//! A session accumulates scanned counts against one warehouse. Every scan of
//! a barcode bumps that product's counted stock by one; the first scan also
//! captures the system stock so the difference is pinned to what the server
//! reported at count time. Submission sends only the products whose counted
//! stock disagrees with the system.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::api::StockApi;
use crate::error::{PosError, PosResult};
use crate::models::{StockAdjustment, StockTakingItem, Warehouse};

/// One in-progress physical count against a warehouse.
pub struct StockReconciliationSession {
    api: Arc<dyn StockApi>,
    items: Vec<StockTakingItem>,
}

impl StockReconciliationSession {
    pub fn new(api: Arc<dyn StockApi>) -> Self {
        Self {
            api,
            items: Vec::new(),
        }
    }

    /// The counted lines so far.
    pub fn items(&self) -> &[StockTakingItem] {
        &self.items
    }

    /// Scan a barcode or search term against the warehouse being counted.
    ///
    /// Every product the server matches is applied: an already-counted
    /// product gains one more unit, a new product enters the session with a
    /// count of one. Returns the number of products applied; `NotFound` when
    /// the server matched nothing.
    pub async fn scan(&mut self, query: &str, warehouse_id: Uuid) -> PosResult<usize> {
        let matches = self.api.search_products(query, warehouse_id).await?;
        if matches.is_empty() {
            return Err(PosError::NotFound(format!(
                "No product matches '{query}' in this warehouse"
            )));
        }

        let applied = matches.len();
        for product in matches {
            match self.items.iter_mut().find(|i| i.product_id == product.id) {
                Some(item) => {
                    item.actual_stock += 1.0;
                    item.recompute_difference();
                }
                None => {
                    let mut item = StockTakingItem {
                        product_id: product.id,
                        barcode: product.barcode,
                        name: product.name,
                        warehouse_id,
                        current_stock: product.stock,
                        actual_stock: 1.0,
                        difference: 0.0,
                    };
                    item.recompute_difference();
                    self.items.push(item);
                }
            }
        }
        Ok(applied)
    }

    /// Manually override a counted quantity (the editable count column).
    pub fn set_actual_stock(&mut self, product_id: Uuid, value: f64) -> PosResult<()> {
        if value < 0.0 {
            return Err(PosError::Validation(format!(
                "Counted stock cannot be negative (got {value})"
            )));
        }
        let item = self
            .items
            .iter_mut()
            .find(|i| i.product_id == product_id)
            .ok_or_else(|| {
                PosError::NotFound(format!("Product {product_id} is not in this count"))
            })?;
        item.actual_stock = value;
        item.recompute_difference();
        Ok(())
    }

    /// Re-derive every difference from its counted and system stock.
    pub fn recompute_all(&mut self) {
        for item in &mut self.items {
            item.recompute_difference();
        }
    }

    /// Submit the count. Only products whose counted stock disagrees with
    /// the system are sent; an all-matching count is rejected locally.
    /// The session is cleared once the server accepts the batch.
    pub async fn submit(&mut self) -> PosResult<usize> {
        self.recompute_all();
        let adjustments: Vec<StockAdjustment> = self
            .items
            .iter()
            .filter(|i| i.actual_stock != i.current_stock)
            .map(|i| StockAdjustment {
                product_id: i.product_id,
                actual_stock: i.actual_stock,
                warehouse_id: i.warehouse_id,
                notes: format!("Stock adjustment - {} units", i.difference),
            })
            .collect();

        if adjustments.is_empty() {
            return Err(PosError::Validation(
                "No stock differences to submit".into(),
            ));
        }

        let count = adjustments.len();
        self.api.submit_stock_adjustments(&adjustments).await?;
        info!(adjustments = count, "stock count submitted");
        self.reset();
        Ok(count)
    }

    /// Undo the last committed stock-taking on the server.
    pub async fn rollback(&self, warehouse_id: Uuid) -> PosResult<()> {
        warn!(%warehouse_id, "rolling back committed stock-taking");
        self.api.rollback_stocktaking(warehouse_id).await
    }

    pub async fn load_warehouses(&self) -> PosResult<Vec<Warehouse>> {
        self.api.warehouses().await
    }

    /// Drop all counted lines.
    pub fn reset(&mut self) {
        self.items.clear();
    }
}

// ===========================================================================
// Tests
// ===========================================================================
