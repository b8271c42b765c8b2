//! Stock-transfer sessions between warehouses.
//!
//! A session moves quantities of source-warehouse products onto one
//! destination product. The destination is a single session-scoped choice:
//! selecting it re-stamps every line already added, and lines added before
//! any selection carry the nil-UUID sentinel until one is made. Quantities
//! are clamped to the stock actually available at the source.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::api::StockApi;
use crate::error::{PosError, PosResult};
use crate::models::{StockTransferItem, StockTransferRequest, Warehouse};

/// Sentinel meaning "no destination product selected yet".
pub const UNSET_DESTINATION: Uuid = Uuid::nil();

/// One in-progress transfer between a source and a destination warehouse.
pub struct StockTransferSession {
    api: Arc<dyn StockApi>,
    source_warehouse: Option<Uuid>,
    destination_warehouse: Option<Uuid>,
    destination_product_id: Uuid,
    items: Vec<StockTransferItem>,
}

impl StockTransferSession {
    pub fn new(api: Arc<dyn StockApi>) -> Self {
        Self {
            api,
            source_warehouse: None,
            destination_warehouse: None,
            destination_product_id: UNSET_DESTINATION,
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[StockTransferItem] {
        &self.items
    }

    pub fn destination_product_id(&self) -> Uuid {
        self.destination_product_id
    }

    /// Choose the two warehouses the transfer runs between.
    pub fn set_warehouses(&mut self, source: Uuid, destination: Uuid) {
        self.source_warehouse = Some(source);
        self.destination_warehouse = Some(destination);
    }

    /// Search the source warehouse and add the first match as a new line.
    ///
    /// The line is stamped with whatever destination product is currently
    /// selected, which may still be the unset sentinel.
    pub async fn search_source(&mut self, term: &str) -> PosResult<()> {
        let warehouse_id = self.source_warehouse.ok_or_else(|| {
            PosError::Validation("Select a source warehouse before searching".into())
        })?;

        let matches = self.api.search_products(term, warehouse_id).await?;
        let product = matches.into_iter().next().ok_or_else(|| {
            PosError::NotFound(format!("No product matches '{term}' in the source warehouse"))
        })?;

        self.items.push(StockTransferItem {
            source_product_id: product.id,
            destination_product_id: self.destination_product_id,
            barcode: product.barcode,
            name: product.name,
            current_stock: product.stock,
            quantity: 0.0,
            warehouse_id,
        });
        Ok(())
    }

    /// Search the destination warehouse and select the first match as the
    /// destination product, re-stamping every line already in the session.
    pub async fn search_destination(&mut self, term: &str) -> PosResult<()> {
        let warehouse_id = self.destination_warehouse.ok_or_else(|| {
            PosError::Validation("Select a destination warehouse before searching".into())
        })?;

        let matches = self.api.search_products(term, warehouse_id).await?;
        let product = matches.into_iter().next().ok_or_else(|| {
            PosError::NotFound(format!(
                "No product matches '{term}' in the destination warehouse"
            ))
        })?;

        self.destination_product_id = product.id;
        for item in &mut self.items {
            item.destination_product_id = product.id;
        }
        info!(destination_product = %product.id, "destination product selected");
        Ok(())
    }

    /// Set the quantity to move for one line, clamped to what the source
    /// warehouse actually holds. Out-of-range input is corrected, not
    /// rejected, so a mistyped count never blocks the operator.
    pub fn set_quantity(&mut self, source_product_id: Uuid, value: f64) -> PosResult<()> {
        let item = self
            .items
            .iter_mut()
            .find(|i| i.source_product_id == source_product_id)
            .ok_or_else(|| {
                PosError::NotFound(format!(
                    "Product {source_product_id} is not in this transfer"
                ))
            })?;

        let clamped = value.clamp(0.0, item.current_stock);
        if clamped != value {
            warn!(
                requested = value,
                clamped,
                available = item.current_stock,
                product = %source_product_id,
                "transfer quantity clamped to available stock"
            );
        }
        item.quantity = clamped;
        Ok(())
    }

    /// Submit the transfer. Validation runs entirely locally; nothing is
    /// sent unless both warehouses and a real destination product are
    /// selected and at least one line moves a positive quantity. Lines with
    /// zero quantity are dropped from the batch. The session is fully reset
    /// once the server accepts it.
    pub async fn submit(&mut self) -> PosResult<usize> {
        let (source, destination) = self.validated_warehouses()?;

        if self.destination_product_id == UNSET_DESTINATION {
            return Err(PosError::Validation(
                "Select a destination product before submitting".into(),
            ));
        }

        let transfers: Vec<StockTransferRequest> = self
            .items
            .iter()
            .filter(|i| i.quantity > 0.0)
            .map(|i| StockTransferRequest {
                source_product_id: i.source_product_id,
                destination_product_id: i.destination_product_id,
                quantity: i.quantity,
                source_warehouse_id: source,
                destination_warehouse_id: destination,
            })
            .collect();

        if transfers.is_empty() {
            return Err(PosError::Validation(
                "Set a quantity on at least one product".into(),
            ));
        }

        let count = transfers.len();
        self.api.transfer_stock(&transfers).await?;
        info!(lines = count, "stock transfer submitted");
        self.reset();
        Ok(count)
    }

    pub async fn load_warehouses(&self) -> PosResult<Vec<Warehouse>> {
        self.api.warehouses().await
    }

    /// Clear everything: lines, destination selection, and warehouses.
    pub fn reset(&mut self) {
        self.items.clear();
        self.destination_product_id = UNSET_DESTINATION;
        self.source_warehouse = None;
        self.destination_warehouse = None;
    }

    fn validated_warehouses(&self) -> PosResult<(Uuid, Uuid)> {
        match (self.source_warehouse, self.destination_warehouse) {
            (Some(source), Some(destination)) => Ok((source, destination)),
            _ => Err(PosError::Validation(
                "Select both a source and a destination warehouse".into(),
            )),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ProductMatch, StockAdjustment};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct FakeStockApi {
        products: Vec<ProductMatch>,
        transfers: StdMutex<Vec<Vec<StockTransferRequest>>>,
        transfer_calls: AtomicUsize,
    }

    impl FakeStockApi {
        fn with_products(products: Vec<ProductMatch>) -> Self {
            Self {
                products,
                transfers: StdMutex::new(Vec::new()),
                transfer_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StockApi for FakeStockApi {
        async fn search_products(
            &self,
            query: &str,
            _warehouse_id: Uuid,
        ) -> PosResult<Vec<ProductMatch>> {
            Ok(self
                .products
                .iter()
                .filter(|p| p.barcode == query || p.name.contains(query))
                .cloned()
                .collect())
        }

        async fn submit_stock_adjustments(
            &self,
            _adjustments: &[StockAdjustment],
        ) -> PosResult<()> {
            unreachable!("stock-taking is not part of transfer")
        }

        async fn rollback_stocktaking(&self, _warehouse_id: Uuid) -> PosResult<()> {
            unreachable!("rollback is not part of transfer")
        }

        async fn transfer_stock(&self, transfers: &[StockTransferRequest]) -> PosResult<()> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            self.transfers
                .lock()
                .expect("transfers lock")
                .push(transfers.to_vec());
            Ok(())
        }

        async fn warehouses(&self) -> PosResult<Vec<Warehouse>> {
            Ok(Vec::new())
        }
    }

    fn product(barcode: &str, stock: f64) -> ProductMatch {
        ProductMatch {
            id: Uuid::new_v4(),
            name: format!("Product {barcode}"),
            barcode: barcode.to_string(),
            stock,
        }
    }

    fn session_with(products: Vec<ProductMatch>) -> (StockTransferSession, Arc<FakeStockApi>) {
        let api = Arc::new(FakeStockApi::with_products(products));
        let mut session = StockTransferSession::new(Arc::clone(&api) as Arc<dyn StockApi>);
        session.set_warehouses(Uuid::new_v4(), Uuid::new_v4());
        (session, api)
    }

    #[tokio::test]
    async fn test_source_search_takes_first_match() {
        let first = product("shared", 4.0);
        let second = product("shared", 9.0);
        let (mut session, _api) = session_with(vec![first.clone(), second]);

        session.search_source("shared").await.expect("search");
        assert_eq!(session.items().len(), 1);
        assert_eq!(session.items()[0].source_product_id, first.id);
        assert_eq!(session.items()[0].current_stock, 4.0);
        // No destination chosen yet
        assert_eq!(
            session.items()[0].destination_product_id,
            UNSET_DESTINATION
        );
    }

    #[tokio::test]
    async fn test_destination_selection_restamps_existing_lines() {
        let source_a = product("aaa", 3.0);
        let source_b = product("bbb", 3.0);
        let dest = product("ddd", 0.0);
        let (mut session, _api) = session_with(vec![source_a, source_b, dest.clone()]);

        session.search_source("aaa").await.expect("add a");
        session.search_source("bbb").await.expect("add b");
        session.search_destination("ddd").await.expect("pick dest");

        assert_eq!(session.destination_product_id(), dest.id);
        assert!(session
            .items()
            .iter()
            .all(|i| i.destination_product_id == dest.id));
    }

    #[tokio::test]
    async fn test_quantity_is_clamped_to_available_stock() {
        let source = product("aaa", 5.0);
        let (mut session, _api) = session_with(vec![source.clone()]);
        session.search_source("aaa").await.expect("add");

        session.set_quantity(source.id, 99.0).expect("over");
        assert_eq!(session.items()[0].quantity, 5.0);

        session.set_quantity(source.id, -2.0).expect("under");
        assert_eq!(session.items()[0].quantity, 0.0);

        session.set_quantity(source.id, 3.0).expect("in range");
        assert_eq!(session.items()[0].quantity, 3.0);
    }

    #[tokio::test]
    async fn test_submit_rejects_unset_destination_without_network() {
        let source = product("aaa", 5.0);
        let (mut session, api) = session_with(vec![source.clone()]);
        session.search_source("aaa").await.expect("add");
        session.set_quantity(source.id, 2.0).expect("qty");

        let err = session.submit().await.expect_err("no destination");
        assert!(matches!(err, PosError::Validation(_)));
        assert_eq!(api.transfer_calls.load(Ordering::SeqCst), 0);
        // Lines survive so the operator can pick a destination and retry
        assert_eq!(session.items().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_requires_both_warehouses() {
        let api = Arc::new(FakeStockApi::with_products(Vec::new()));
        let mut session = StockTransferSession::new(api as Arc<dyn StockApi>);
        let err = session.submit().await.expect_err("no warehouses");
        assert!(matches!(err, PosError::Validation(_)));
    }

    #[tokio::test]
    async fn test_submit_requires_a_positive_quantity() {
        let source = product("aaa", 5.0);
        let dest = product("ddd", 0.0);
        let (mut session, api) = session_with(vec![source, dest]);
        session.search_source("aaa").await.expect("add");
        session.search_destination("ddd").await.expect("dest");

        // All lines still at quantity 0
        let err = session.submit().await.expect_err("nothing to move");
        assert!(matches!(err, PosError::Validation(_)));
        assert_eq!(api.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_sends_positive_lines_and_resets_session() {
        let moved = product("aaa", 5.0);
        let untouched = product("bbb", 5.0);
        let dest = product("ddd", 0.0);
        let (mut session, api) = session_with(vec![moved.clone(), untouched, dest.clone()]);

        session.search_source("aaa").await.expect("add moved");
        session.search_source("bbb").await.expect("add untouched");
        session.search_destination("ddd").await.expect("dest");
        session.set_quantity(moved.id, 2.0).expect("qty");

        let count = session.submit().await.expect("submit");
        assert_eq!(count, 1);

        let batches = api.transfers.lock().expect("transfers lock");
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        let request = &batches[0][0];
        assert_eq!(request.source_product_id, moved.id);
        assert_eq!(request.destination_product_id, dest.id);
        assert_eq!(request.quantity, 2.0);

        // Full reset: lines, destination, and warehouses all cleared
        assert!(session.items().is_empty());
        assert_eq!(session.destination_product_id(), UNSET_DESTINATION);
        let err = session.submit().await.expect_err("fresh session");
        assert!(matches!(err, PosError::Validation(_)));
    }
}
