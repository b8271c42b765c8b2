//! Back-office server API client.
//!
//! Provides authenticated HTTP communication with the back-office server:
//! connectivity probing, sales-order submission, shift lifecycle calls, and
//! the stock-taking / stock-transfer endpoints. Each remote concern is also
//! exposed as an `async_trait` trait so sessions and engines can be exercised
//! against scripted fakes.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PosError, PosResult};
use crate::models::{
    ProductMatch, SalesOrder, Shift, ShiftSummary, StockAdjustment, StockTransferRequest,
    Warehouse,
};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the back-office server URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment (paths already carry it)
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_server_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    // Ensure scheme
    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    // Strip trailing slashes
    while url.ends_with('/') {
        url.pop();
    }

    // Strip trailing /api
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }

    // Strip trailing slashes again (in case "/api/" was present)
    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach server at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid server URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        400 => "Request rejected by server".to_string(),
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Server endpoint or entity not found".to_string(),
        409 => "Request conflicts with server state".to_string(),
        s if s >= 500 => format!("Server error (HTTP {s})"),
        s => format!("Unexpected response from server (HTTP {s})"),
    }
}

/// Classify an HTTP failure status into the error taxonomy.
///
/// 5xx is transient (the server exists but is unhealthy); 400 means the
/// payload or state was rejected; 404/409 map to their named variants; the
/// remaining 4xx are configuration problems that retrying will not fix.
fn error_for_status(status: StatusCode, detail: String) -> PosError {
    match status.as_u16() {
        400 => PosError::Validation(detail),
        404 => PosError::NotFound(detail),
        409 => PosError::Conflict(detail),
        s if s >= 500 => PosError::Network(detail),
        _ => PosError::Validation(detail),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Concrete HTTP client for the back-office server.
pub struct ApiClient {
    base_url: String,
    api_key: String,
    client: Client,
    health_client: Client,
}

impl ApiClient {
    pub fn new(server_url: &str, api_key: &str) -> PosResult<Self> {
        let base_url = normalize_server_url(server_url);

        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PosError::Network(format!("Failed to create HTTP client: {e}")))?;

        let health_client = Client::builder()
            .timeout(HEALTH_TIMEOUT)
            .build()
            .map_err(|e| PosError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key: api_key.trim().to_string(),
            client,
            health_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Perform an authenticated request, mapping failures into the taxonomy.
    ///
    /// `path` includes the leading slash and the `/api` prefix,
    /// e.g. `/api/salesOrder/StartShift`.
    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> PosResult<Value> {
        let full_url = self.url(path);

        let mut req = self
            .client
            .request(method, &full_url)
            .header("X-POS-API-Key", &self.api_key)
            .header("Content-Type", "application/json");

        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PosError::Network(friendly_error(&self.base_url, &e)))?;
        let status = resp.status();

        if !status.is_success() {
            // Preserve server-side validation details where the body carries them.
            let body_text = resp.text().await.unwrap_or_default();
            let detail = if let Ok(json) = serde_json::from_str::<Value>(&body_text) {
                json.get("error")
                    .or_else(|| json.get("message"))
                    .and_then(Value::as_str)
                    .map(|s| format!("{s} (HTTP {})", status.as_u16()))
                    .unwrap_or_else(|| {
                        format!("{} (HTTP {})", status_error(status), status.as_u16())
                    })
            } else if !body_text.trim().is_empty() {
                format!(
                    "{} (HTTP {}): {}",
                    status_error(status),
                    status.as_u16(),
                    body_text.trim()
                )
            } else {
                format!("{} (HTTP {})", status_error(status), status.as_u16())
            };
            return Err(error_for_status(status, detail));
        }

        // Return the JSON body, or null for empty 204 responses.
        let body_text = resp.text().await.unwrap_or_default();
        if body_text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text)
            .map_err(|e| PosError::Network(format!("Invalid JSON from server: {e}")))
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> PosResult<T> {
        serde_json::from_value(value)
            .map_err(|e| PosError::Network(format!("Unexpected response shape from server: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Remote seams
// ---------------------------------------------------------------------------

/// Lightweight reachability probe for the back-office server.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Sales-order endpoints.
#[async_trait]
pub trait OrderApi: Send + Sync {
    /// Submit a sales order; returns the server's copy.
    async fn create_sales_order(&self, order: &SalesOrder) -> PosResult<SalesOrder>;

    /// Fetch the advisory next order number.
    async fn new_order_number(&self) -> PosResult<String>;
}

/// Shift lifecycle endpoints.
#[async_trait]
pub trait ShiftApi: Send + Sync {
    async fn has_ongoing_shift(&self) -> PosResult<bool>;
    async fn start_shift(&self) -> PosResult<Shift>;
    async fn latest_shift(&self) -> PosResult<Shift>;
    async fn end_shift(&self) -> PosResult<ShiftSummary>;
}

/// Stock-taking and stock-transfer endpoints.
#[async_trait]
pub trait StockApi: Send + Sync {
    async fn search_products(
        &self,
        query: &str,
        warehouse_id: Uuid,
    ) -> PosResult<Vec<ProductMatch>>;
    async fn submit_stock_adjustments(&self, adjustments: &[StockAdjustment]) -> PosResult<()>;
    async fn rollback_stocktaking(&self, warehouse_id: Uuid) -> PosResult<()>;
    async fn transfer_stock(&self, transfers: &[StockTransferRequest]) -> PosResult<()>;
    async fn warehouses(&self) -> PosResult<Vec<Warehouse>>;
}

#[async_trait]
impl ConnectivityProbe for ApiClient {
    async fn is_online(&self) -> bool {
        let health_url = self.url("/api/health");
        match self
            .health_client
            .head(&health_url)
            .header("X-POS-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => {
                let online = resp.status().is_success();
                debug!(online, "connectivity probe");
                online
            }
            Err(e) => {
                debug!(error = %e, "connectivity probe failed");
                false
            }
        }
    }
}

#[async_trait]
impl OrderApi for ApiClient {
    async fn create_sales_order(&self, order: &SalesOrder) -> PosResult<SalesOrder> {
        let body = serde_json::to_value(order)?;
        let value = self
            .request(reqwest::Method::POST, "/api/salesOrder", Some(body))
            .await?;
        info!(order_number = %order.order_number, "sales order submitted");
        // Some deployments return 204 for accepted orders; fall back to the
        // order we sent so callers always get a usable copy back.
        if value.is_null() {
            return Ok(order.clone());
        }
        Self::decode(value)
    }

    async fn new_order_number(&self) -> PosResult<String> {
        let value = self
            .request(
                reqwest::Method::GET,
                "/api/salesOrder/GetNewSalesOrderNumber",
                None,
            )
            .await?;
        match value {
            Value::String(s) => Ok(s),
            other => Self::decode(other),
        }
    }
}

#[async_trait]
impl ShiftApi for ApiClient {
    async fn has_ongoing_shift(&self) -> PosResult<bool> {
        let value = self
            .request(
                reqwest::Method::GET,
                "/api/salesOrder/CheckOngoingShift",
                None,
            )
            .await?;
        match value {
            Value::Bool(b) => Ok(b),
            other => Self::decode(other),
        }
    }

    async fn start_shift(&self) -> PosResult<Shift> {
        let value = self
            .request(reqwest::Method::POST, "/api/salesOrder/StartShift", None)
            .await?;
        Self::decode(value)
    }

    async fn latest_shift(&self) -> PosResult<Shift> {
        let value = self
            .request(reqwest::Method::GET, "/api/salesOrder/GetLatestShift", None)
            .await?;
        Self::decode(value)
    }

    async fn end_shift(&self) -> PosResult<ShiftSummary> {
        let value = self
            .request(reqwest::Method::POST, "/api/salesOrder/EndShift", None)
            .await?;
        Self::decode(value)
    }
}

#[async_trait]
impl StockApi for ApiClient {
    async fn search_products(
        &self,
        query: &str,
        warehouse_id: Uuid,
    ) -> PosResult<Vec<ProductMatch>> {
        let path = format!(
            "/api/stocktaking/search?warehouseId={warehouse_id}&query={}",
            urlencoding::encode(query)
        );
        let value = self.request(reqwest::Method::GET, &path, None).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Self::decode(value)
    }

    async fn submit_stock_adjustments(&self, adjustments: &[StockAdjustment]) -> PosResult<()> {
        let body = serde_json::to_value(adjustments)?;
        self.request(reqwest::Method::PUT, "/api/stocktaking", Some(body))
            .await?;
        info!(count = adjustments.len(), "stock adjustments submitted");
        Ok(())
    }

    async fn rollback_stocktaking(&self, warehouse_id: Uuid) -> PosResult<()> {
        // Rolls back the most recent committed batch; the endpoint takes no
        // body, the warehouse id is for logging and fakes only.
        self.request(reqwest::Method::POST, "/api/stocktaking/rollback", None)
            .await?;
        info!(%warehouse_id, "stock-taking rollback requested");
        Ok(())
    }

    async fn transfer_stock(&self, transfers: &[StockTransferRequest]) -> PosResult<()> {
        let body = serde_json::to_value(transfers)?;
        self.request(reqwest::Method::POST, "/api/stockTransfer", Some(body))
            .await?;
        info!(count = transfers.len(), "stock transfer submitted");
        Ok(())
    }

    async fn warehouses(&self) -> PosResult<Vec<Warehouse>> {
        let value = self
            .request(reqwest::Method::GET, "/api/warehouses", None)
            .await?;
        Self::decode(value)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
