//! Order submission gateway.
//!
//! The single entry point for sending a finished sale to the server. The
//! contract: validate locally first, resolve the shift to stamp, then either
//! POST the order or queue it durably when the server cannot be reached.
//! A queued order is a degraded success, not a failure; the sync engine
//! drains the queue once connectivity returns.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::{ConnectivityProbe, OrderApi};
use crate::error::{PosError, PosResult};
use crate::models::{order_number_suffix, SalesOrder};
use crate::order_store::LocalOrderStore;
use crate::shifts::ShiftCoordinator;

/// How a submitted order ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// The server acknowledged the order.
    Submitted,
    /// The order was persisted locally for later sync.
    QueuedLocally,
}

/// The order as it ended up (server copy or locally renumbered copy) plus
/// where it went.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub order: SalesOrder,
    pub outcome: SubmissionOutcome,
}

/// Validates, stamps, and routes finished sales orders.
pub struct OrderSubmissionGateway {
    orders: Arc<dyn OrderApi>,
    probe: Arc<dyn ConnectivityProbe>,
    shifts: Arc<ShiftCoordinator>,
    store: Arc<LocalOrderStore>,
    // One submission at a time; keeps resolve-then-stamp and the queue
    // read-modify-write from interleaving across concurrent checkouts.
    submit_lock: Mutex<()>,
}

impl OrderSubmissionGateway {
    pub fn new(
        orders: Arc<dyn OrderApi>,
        probe: Arc<dyn ConnectivityProbe>,
        shifts: Arc<ShiftCoordinator>,
        store: Arc<LocalOrderStore>,
    ) -> Self {
        Self {
            orders,
            probe,
            shifts,
            store,
            submit_lock: Mutex::new(()),
        }
    }

    /// Submit a finished sale.
    ///
    /// Validation failures return before any network traffic. When online,
    /// the shift id is resolved and stamped before the POST; a transient
    /// failure anywhere past validation downgrades to local queuing.
    pub async fn submit(&self, mut order: SalesOrder) -> PosResult<SubmittedOrder> {
        validate_order(&order)?;
        order.recompute_totals();

        let _guard = self.submit_lock.lock().await;

        if !self.probe.is_online().await {
            info!(order_number = %order.order_number, "offline, queuing order");
            return self.queue_locally(order);
        }

        match self.shifts.resolve_shift_id().await {
            Ok(shift_id) => order.shift_id = Some(shift_id),
            Err(e) if e.is_transient() => {
                warn!(error = %e, "shift resolution failed, queuing order");
                return self.queue_locally(order);
            }
            Err(e) => return Err(e),
        }

        match self.orders.create_sales_order(&order).await {
            Ok(server_copy) => Ok(SubmittedOrder {
                order: server_copy,
                outcome: SubmissionOutcome::Submitted,
            }),
            Err(e) if e.is_transient() => {
                warn!(error = %e, order_number = %order.order_number, "submit failed, queuing order");
                self.queue_locally(order)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the advisory next order number and remember it for offline use.
    pub async fn new_order_number_hint(&self) -> PosResult<String> {
        match self.orders.new_order_number().await {
            Ok(number) => {
                self.store.cache_number_hint(&number)?;
                Ok(number)
            }
            Err(e) if e.is_transient() => match self.store.cached_number_hint()? {
                Some(hint) => {
                    info!(hint = %hint, "serving cached order-number hint while offline");
                    Ok(hint)
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    fn queue_locally(&self, mut order: SalesOrder) -> PosResult<SubmittedOrder> {
        // Offline attribution: reuse the shift that was open when we last
        // talked to the server. The server may re-attribute on sync.
        if order.shift_id.is_none() {
            order.shift_id = self.shifts.cached_shift_id()?;
        }
        let pending = self.store.enqueue(order)?;
        Ok(SubmittedOrder {
            order: pending.order,
            outcome: SubmissionOutcome::QueuedLocally,
        })
    }
}

/// Local preconditions checked before any network call.
fn validate_order(order: &SalesOrder) -> PosResult<()> {
    if order.items.is_empty() {
        return Err(PosError::Validation(
            "Cannot submit an order with no items".into(),
        ));
    }
    // The queue renumbers from the numeric suffix of its last entry, so an
    // order without one would poison the sequence for everything after it.
    if order_number_suffix(&order.order_number).is_none() {
        return Err(PosError::Validation(format!(
            "Order number '{}' has no numeric sequence",
            order.order_number
        )));
    }
    for item in &order.items {
        if item.quantity <= 0.0 {
            return Err(PosError::Validation(format!(
                "Item quantity must be positive (got {})",
                item.quantity
            )));
        }
        if item.unit_price < 0.0 {
            return Err(PosError::Validation(format!(
                "Item unit price cannot be negative (got {})",
                item.unit_price
            )));
        }
        if !(0.0..=100.0).contains(&item.discount_percentage) {
            return Err(PosError::Validation(format!(
                "Item discount percentage out of range (got {})",
                item.discount_percentage
            )));
        }
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
