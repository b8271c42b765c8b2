//! Durable queue of sales orders awaiting submission.
//!
//! The queue lives in a single `local_settings('orders','pending_queue')` row
//! holding a JSON-encoded list, read-modify-written under the database mutex.
//! Enqueuing renumbers the incoming order from the last queued one so the
//! queue always carries strictly increasing order numbers even while the
//! server's counter is unreachable.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::error::PosResult;
use crate::models::{
    format_order_number, order_number_suffix, LocalPendingOrder, SalesOrder,
};

const CATEGORY: &str = "orders";
const QUEUE_KEY: &str = "pending_queue";
const NUMBER_HINT_KEY: &str = "next_number_hint";

/// Local persistence for orders the server has not yet acknowledged.
pub struct LocalOrderStore {
    db: Arc<DbState>,
}

impl LocalOrderStore {
    pub fn new(db: Arc<DbState>) -> Self {
        Self { db }
    }

    /// Queue an order for later submission.
    ///
    /// When the queue already holds orders, the incoming order's number is
    /// replaced with the successor of the last queued number, so offline
    /// numbering stays gap-free and strictly increasing regardless of what
    /// stale hint the caller stamped on it. An order arriving at an empty
    /// queue without a parsable number is started at sequence 1 rather than
    /// stored as-is; every queued entry must carry a numeric suffix or the
    /// monotonicity guarantee unravels for everything queued after it.
    pub fn enqueue(&self, mut order: SalesOrder) -> PosResult<LocalPendingOrder> {
        let conn = self.db.lock()?;
        let mut queue = load_queue(&conn)?;

        if let Some(last) = queue.last() {
            let next = order_number_suffix(&last.order.order_number).map_or(1, |s| s + 1);
            let renumbered = format_order_number(next);
            if renumbered != order.order_number {
                info!(
                    from = %order.order_number,
                    to = %renumbered,
                    "renumbered queued order after last pending entry"
                );
            }
            order.order_number = renumbered;
        } else if order_number_suffix(&order.order_number).is_none() {
            let assigned = format_order_number(1);
            warn!(
                order_number = %order.order_number,
                assigned = %assigned,
                "order number has no numeric suffix, starting a fresh sequence"
            );
            order.order_number = assigned;
        }

        let pending = LocalPendingOrder {
            local_id: Uuid::new_v4(),
            queued_at: Utc::now(),
            order,
        };
        queue.push(pending.clone());
        save_queue(&conn, &queue)?;

        info!(
            local_id = %pending.local_id,
            order_number = %pending.order.order_number,
            pending = queue.len(),
            "order queued locally"
        );
        Ok(pending)
    }

    /// Snapshot of the queue, sorted ascending by numeric order-number suffix.
    pub fn list_pending(&self) -> PosResult<Vec<LocalPendingOrder>> {
        let conn = self.db.lock()?;
        let mut queue = load_queue(&conn)?;
        queue.sort_by_key(|p| order_number_suffix(&p.order.order_number).unwrap_or(u64::MAX));
        Ok(queue)
    }

    /// Remove one queued order. A no-op when the id is not present, so the
    /// sync engine can call it again after a crash between POST and remove.
    pub fn remove(&self, local_id: Uuid) -> PosResult<()> {
        let conn = self.db.lock()?;
        let mut queue = load_queue(&conn)?;
        let before = queue.len();
        queue.retain(|p| p.local_id != local_id);
        if queue.len() != before {
            save_queue(&conn, &queue)?;
            info!(%local_id, pending = queue.len(), "queued order removed");
        }
        Ok(())
    }

    pub fn pending_count(&self) -> PosResult<usize> {
        let conn = self.db.lock()?;
        Ok(load_queue(&conn)?.len())
    }

    /// Remember the server's advisory next order number for offline stamping.
    pub fn cache_number_hint(&self, hint: &str) -> PosResult<()> {
        let conn = self.db.lock()?;
        db::set_setting(&conn, CATEGORY, NUMBER_HINT_KEY, hint)
    }

    pub fn cached_number_hint(&self) -> PosResult<Option<String>> {
        let conn = self.db.lock()?;
        Ok(db::get_setting(&conn, CATEGORY, NUMBER_HINT_KEY))
    }
}

fn load_queue(conn: &Connection) -> PosResult<Vec<LocalPendingOrder>> {
    match db::get_setting(conn, CATEGORY, QUEUE_KEY) {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(Vec::new()),
    }
}

fn save_queue(conn: &Connection, queue: &[LocalPendingOrder]) -> PosResult<()> {
    let raw = serde_json::to_string(queue)?;
    db::set_setting(conn, CATEGORY, QUEUE_KEY, &raw)
}

// ===========================================================================
// Tests
// ===========================================================================
