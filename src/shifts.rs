//! Shift lifecycle coordination.
//!
//! The server owns shift state; this module wraps the shift endpoints with
//! the resolve-then-stamp contract order submission relies on, and keeps a
//! local hint of the active shift id so offline orders can still be
//! attributed to the shift that was open when connectivity dropped.

use std::sync::Arc;

use tracing::{info, warn};

use crate::api::ShiftApi;
use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};
use crate::models::{Shift, ShiftSummary};

const CATEGORY: &str = "shift";
const ACTIVE_SHIFT_KEY: &str = "active_shift_id";

/// Coordinates shift resolution between the server and the local hint cache.
pub struct ShiftCoordinator {
    api: Arc<dyn ShiftApi>,
    db: Arc<DbState>,
}

impl ShiftCoordinator {
    pub fn new(api: Arc<dyn ShiftApi>, db: Arc<DbState>) -> Self {
        Self { api, db }
    }

    /// Server-authoritative check for an open shift.
    pub async fn check_ongoing_shift(&self) -> PosResult<bool> {
        self.api.has_ongoing_shift().await
    }

    /// Open a new shift. The server answers HTTP 400 when one is already
    /// open, which this layer reports as a conflict rather than a caller
    /// mistake.
    pub async fn start_shift(&self) -> PosResult<Shift> {
        let shift = match self.api.start_shift().await {
            Ok(shift) => shift,
            Err(PosError::Validation(msg)) => {
                return Err(PosError::Conflict(format!(
                    "A shift is already open: {msg}"
                )))
            }
            Err(e) => return Err(e),
        };
        self.cache_shift_id(shift.shift_id)?;
        info!(shift_id = shift.shift_id, "shift started");
        Ok(shift)
    }

    /// Fetch the currently open shift and refresh the local hint.
    pub async fn get_latest_shift(&self) -> PosResult<Shift> {
        let shift = self.api.latest_shift().await?;
        self.cache_shift_id(shift.shift_id)?;
        Ok(shift)
    }

    /// Close the open shift. Returns the sales summary for reconciliation
    /// against the counted drawer; `NotFound` when no shift is open.
    pub async fn end_shift(&self) -> PosResult<ShiftSummary> {
        let summary = self.api.end_shift().await?;
        self.clear_cached_shift_id()?;
        info!(
            net_total = summary.net_total,
            net_cash = summary.net_cash,
            "shift ended"
        );
        Ok(summary)
    }

    /// Resolve the shift id to stamp onto an outgoing order: reuse the open
    /// shift when one exists, otherwise open one. The resolved id is cached
    /// as the offline hint.
    pub async fn resolve_shift_id(&self) -> PosResult<i64> {
        let shift = if self.api.has_ongoing_shift().await? {
            self.get_latest_shift().await?
        } else {
            self.start_shift().await?
        };
        Ok(shift.shift_id)
    }

    /// Last shift id resolved while online. A hint only; the server remains
    /// authoritative and may re-attribute queued orders on sync.
    pub fn cached_shift_id(&self) -> PosResult<Option<i64>> {
        let conn = self.db.lock()?;
        Ok(
            db::get_setting(&conn, CATEGORY, ACTIVE_SHIFT_KEY).and_then(|raw| match raw.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(raw = %raw, "ignoring unparsable cached shift id");
                    None
                }
            }),
        )
    }

    fn cache_shift_id(&self, shift_id: i64) -> PosResult<()> {
        let conn = self.db.lock()?;
        db::set_setting(&conn, CATEGORY, ACTIVE_SHIFT_KEY, &shift_id.to_string())
    }

    fn clear_cached_shift_id(&self) -> PosResult<()> {
        let conn = self.db.lock()?;
        db::delete_setting(&conn, CATEGORY, ACTIVE_SHIFT_KEY)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_for_test;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeShiftApi {
        ongoing: bool,
        start_calls: AtomicUsize,
        latest_calls: AtomicUsize,
        start_result: fn() -> PosResult<Shift>,
    }

    impl FakeShiftApi {
        fn new(ongoing: bool) -> Self {
            Self {
                ongoing,
                start_calls: AtomicUsize::new(0),
                latest_calls: AtomicUsize::new(0),
                start_result: || Ok(Shift { shift_id: 7 }),
            }
        }
    }

    #[async_trait]
    impl ShiftApi for FakeShiftApi {
        async fn has_ongoing_shift(&self) -> PosResult<bool> {
            Ok(self.ongoing)
        }

        async fn start_shift(&self) -> PosResult<Shift> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            (self.start_result)()
        }

        async fn latest_shift(&self) -> PosResult<Shift> {
            self.latest_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Shift { shift_id: 12 })
        }

        async fn end_shift(&self) -> PosResult<ShiftSummary> {
            Ok(ShiftSummary {
                cash_sales_total: 300.0,
                user: "cashier".into(),
                return_total: 0.0,
                visa_sales_total: 120.0,
                net_cash: 300.0,
                total_discount: 0.0,
                net_total: 420.0,
            })
        }
    }

    fn coordinator(api: Arc<FakeShiftApi>) -> ShiftCoordinator {
        ShiftCoordinator::new(api, Arc::new(open_in_memory_for_test()))
    }

    #[tokio::test]
    async fn test_resolve_reuses_ongoing_shift() {
        let api = Arc::new(FakeShiftApi::new(true));
        let coord = coordinator(Arc::clone(&api));

        let shift_id = coord.resolve_shift_id().await.expect("resolve");
        assert_eq!(shift_id, 12);
        assert_eq!(api.latest_calls.load(Ordering::SeqCst), 1);
        // Never tries to open a second shift alongside the ongoing one
        assert_eq!(api.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(coord.cached_shift_id().expect("cached"), Some(12));
    }

    #[tokio::test]
    async fn test_resolve_starts_shift_when_none_open() {
        let api = Arc::new(FakeShiftApi::new(false));
        let coord = coordinator(Arc::clone(&api));

        let shift_id = coord.resolve_shift_id().await.expect("resolve");
        assert_eq!(shift_id, 7);
        assert_eq!(api.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.latest_calls.load(Ordering::SeqCst), 0);
        assert_eq!(coord.cached_shift_id().expect("cached"), Some(7));
    }

    #[tokio::test]
    async fn test_start_shift_maps_rejection_to_conflict() {
        let mut api = FakeShiftApi::new(false);
        api.start_result = || Err(PosError::Validation("shift already open".into()));
        let coord = coordinator(Arc::new(api));

        let err = coord.start_shift().await.expect_err("should conflict");
        assert!(matches!(err, PosError::Conflict(_)));
        // Nothing cached from the failed attempt
        assert_eq!(coord.cached_shift_id().expect("cached"), None);
    }

    #[tokio::test]
    async fn test_end_shift_clears_cached_id() {
        let api = Arc::new(FakeShiftApi::new(true));
        let coord = coordinator(api);

        coord.resolve_shift_id().await.expect("resolve");
        assert_eq!(coord.cached_shift_id().expect("cached"), Some(12));

        let summary = coord.end_shift().await.expect("end shift");
        assert_eq!(summary.deficit(500.0), 80.0);
        assert_eq!(coord.cached_shift_id().expect("cached"), None);
    }
}
