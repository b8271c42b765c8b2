//! Domain types shared across the POS core.
//!
//! Wire names follow the back-office server contract: camelCase for most
//! fields, with the `ShiftId`/`IsVisa` casing quirks the order endpoint
//! expects. Monetary totals are derived from line items and rounded to two
//! decimals; they are never edited independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix carried by every sales-order number, e.g. `SO#0000100`.
pub const ORDER_NUMBER_PREFIX: &str = "SO#";

/// Width of the zero-padded numeric suffix.
const ORDER_NUMBER_PAD: usize = 7;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Order-number arithmetic
// ---------------------------------------------------------------------------

/// Extract the numeric suffix of an order number (`SO#0000100` -> `100`).
///
/// Tolerates a missing prefix by parsing the trailing digit run, so numbers
/// produced by older server versions still sort correctly.
pub fn order_number_suffix(order_number: &str) -> Option<u64> {
    let trimmed = order_number.trim();
    let digits = trimmed.trim_start_matches(|c: char| !c.is_ascii_digit());
    if digits.is_empty() || digits.chars().any(|c| !c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Format a sequence number as a full order number (`101` -> `SO#0000101`).
pub fn format_order_number(sequence: u64) -> String {
    format!("{ORDER_NUMBER_PREFIX}{sequence:0ORDER_NUMBER_PAD$}")
}

/// The order number immediately following `order_number`, or `None` when the
/// numeric suffix cannot be parsed.
pub fn next_order_number_after(order_number: &str) -> Option<String> {
    order_number_suffix(order_number).map(|n| format_order_number(n + 1))
}

// ---------------------------------------------------------------------------
// Sales orders
// ---------------------------------------------------------------------------

/// Return status of a sales order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SalesOrderStatus {
    #[default]
    #[serde(rename = "Not_Return")]
    NotReturn,
    Return,
}

/// A tax applied to an order line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderItemTax {
    pub tax_id: Uuid,
    pub percentage: f64,
}

/// One line of a sales order. Line discount/tax/total are pure functions of
/// these fields and are recomputed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrderItem {
    pub product_id: Uuid,
    pub unit_id: Uuid,
    #[serde(default)]
    pub warehouse_id: Option<Uuid>,
    pub quantity: f64,
    pub unit_price: f64,
    #[serde(default)]
    pub discount_percentage: f64,
    #[serde(rename = "salesOrderItemTaxes", default)]
    pub taxes: Vec<SalesOrderItemTax>,
    #[serde(default)]
    pub product_name: Option<String>,
}

impl SalesOrderItem {
    /// Quantity x unit price, before discount and tax.
    pub fn line_subtotal(&self) -> f64 {
        round2(self.quantity * self.unit_price)
    }

    pub fn line_discount(&self) -> f64 {
        round2(self.line_subtotal() * self.discount_percentage / 100.0)
    }

    /// Tax on the discounted line amount, summed over all tax references.
    pub fn line_tax(&self) -> f64 {
        let taxable = self.line_subtotal() - self.line_discount();
        let rate: f64 = self.taxes.iter().map(|t| t.percentage).sum();
        round2(taxable * rate / 100.0)
    }

    pub fn line_total(&self) -> f64 {
        round2(self.line_subtotal() - self.line_discount() + self.line_tax())
    }
}

/// A sales order as built by the cart and posted to `/api/salesOrder`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesOrder {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub order_number: String,
    /// Server-assigned shift the sale is attributed to. `None` until the
    /// submission path resolves and stamps it.
    #[serde(rename = "ShiftId", alias = "shiftId", default)]
    pub shift_id: Option<i64>,
    pub customer_id: Uuid,
    #[serde(rename = "salesOrderItems", default)]
    pub items: Vec<SalesOrderItem>,
    pub total_amount: f64,
    pub total_discount: f64,
    pub total_tax: f64,
    #[serde(rename = "IsVisa", alias = "isVisa", default)]
    pub is_visa: bool,
    #[serde(rename = "salesOrderStatus", default)]
    pub status: SalesOrderStatus,
    #[serde(default)]
    pub note: Option<String>,
    pub so_created_date: DateTime<Utc>,
}

impl SalesOrder {
    /// Recompute `total_amount`/`total_discount`/`total_tax` from the items.
    /// Totals are never hand-edited; every mutation of the item list must be
    /// followed by this call.
    pub fn recompute_totals(&mut self) {
        let mut amount = 0.0;
        let mut discount = 0.0;
        let mut tax = 0.0;
        for item in &self.items {
            amount += item.line_total();
            discount += item.line_discount();
            tax += item.line_tax();
        }
        self.total_amount = round2(amount);
        self.total_discount = round2(discount);
        self.total_tax = round2(tax);
    }
}

/// A sales order queued locally while the server was unreachable. Owned
/// exclusively by `LocalOrderStore`; removed once the server acknowledges it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPendingOrder {
    pub local_id: Uuid,
    pub queued_at: DateTime<Utc>,
    pub order: SalesOrder,
}

// ---------------------------------------------------------------------------
// Shifts
// ---------------------------------------------------------------------------

/// An open cashier shift as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub shift_id: i64,
}

/// End-of-shift sales summary returned by `/api/salesOrder/EndShift`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftSummary {
    pub cash_sales_total: f64,
    pub user: String,
    pub return_total: f64,
    pub visa_sales_total: f64,
    pub net_cash: f64,
    pub total_discount: f64,
    pub net_total: f64,
}

impl ShiftSummary {
    /// Drawer deficit given the counted drawer balance the operator entered.
    pub fn deficit(&self, drawer_balance: f64) -> f64 {
        round2(drawer_balance - self.net_total)
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// A product candidate returned by `/api/stocktaking/search`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductMatch {
    pub id: Uuid,
    pub name: String,
    pub barcode: String,
    /// Authoritative system stock at scan time.
    #[serde(default)]
    pub stock: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warehouse {
    pub id: Uuid,
    pub name: String,
}

/// One counted product within a stock-taking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTakingItem {
    pub product_id: Uuid,
    pub barcode: String,
    pub name: String,
    pub warehouse_id: Uuid,
    /// System stock fetched from the server on first scan.
    pub current_stock: f64,
    /// Counted stock; starts at 1 on first scan, +1 per rescan.
    pub actual_stock: f64,
    /// Always `actual_stock - current_stock`; recomputed after every mutation.
    pub difference: f64,
}

impl StockTakingItem {
    pub fn recompute_difference(&mut self) {
        self.difference = self.actual_stock - self.current_stock;
    }
}

/// One line of a stock-transfer session. The destination product is a single
/// session-scoped value stamped onto every line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTransferItem {
    pub source_product_id: Uuid,
    pub destination_product_id: Uuid,
    pub barcode: String,
    pub name: String,
    pub current_stock: f64,
    pub quantity: f64,
    /// Source warehouse the product was found in.
    pub warehouse_id: Uuid,
}

// ---------------------------------------------------------------------------
// Wire payloads
// ---------------------------------------------------------------------------

/// One entry of the stock-taking batch sent to `PUT /api/stocktaking`.
/// PascalCase field names are what the inventory endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockAdjustment {
    #[serde(rename = "ProductId")]
    pub product_id: Uuid,
    #[serde(rename = "ActualStock")]
    pub actual_stock: f64,
    #[serde(rename = "WarehouseId")]
    pub warehouse_id: Uuid,
    #[serde(rename = "Notes")]
    pub notes: String,
}

/// One entry of the transfer batch sent to `POST /api/stockTransfer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockTransferRequest {
    pub source_product_id: Uuid,
    pub destination_product_id: Uuid,
    pub quantity: f64,
    pub source_warehouse_id: Uuid,
    pub destination_warehouse_id: Uuid,
}

// ===========================================================================
// Tests
// ===========================================================================
