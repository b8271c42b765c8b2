//! Background sync engine for the pending-order queue.
//!
//! Drains locally queued orders to the server in strict queue order. A pass
//! stops at the first order that cannot be delivered, so the server never
//! sees order numbers out of sequence; the remainder stays queued for the
//! next pass. Progress is broadcast on a `tokio::sync::broadcast` channel
//! so the hosting application can surface sync status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::api::{ConnectivityProbe, OrderApi};
use crate::error::{PosError, PosResult};
use crate::models::SalesOrder;
use crate::order_store::LocalOrderStore;
use crate::shifts::ShiftCoordinator;

/// Retry attempts per order within one pass.
const MAX_RETRIES: u32 = 3;

/// Initial delay between retry attempts.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Retry delays double per attempt but never exceed this.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Sync progress notifications.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// One queued order was acknowledged by the server.
    OrderSynced { order_number: String },
    /// A pass stopped early; the named order and everything after it remain
    /// queued.
    SyncHalted { order_number: String, error: String },
    /// The queue was fully drained this pass.
    QueueDrained { synced: usize },
    /// Connectivity changed between loop ticks.
    NetworkStatus { online: bool },
}

/// Outcome of one sync pass.
#[derive(Debug)]
pub struct SyncReport {
    /// Order numbers acknowledged by the server, in submission order.
    pub synced: Vec<String>,
    /// The order that halted the pass, when one did.
    pub failed: Option<(String, PosError)>,
}

impl SyncReport {
    pub fn drained(&self) -> bool {
        self.failed.is_none()
    }
}

/// Drains the local order queue to the server.
pub struct OrderSyncEngine {
    orders: Arc<dyn OrderApi>,
    probe: Arc<dyn ConnectivityProbe>,
    shifts: Arc<ShiftCoordinator>,
    store: Arc<LocalOrderStore>,
    events: broadcast::Sender<SyncEvent>,
    // Serialises passes triggered by the loop and by manual force-sync.
    pass_lock: Mutex<()>,
    loop_running: AtomicBool,
}

impl OrderSyncEngine {
    pub fn new(
        orders: Arc<dyn OrderApi>,
        probe: Arc<dyn ConnectivityProbe>,
        shifts: Arc<ShiftCoordinator>,
        store: Arc<LocalOrderStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            orders,
            probe,
            shifts,
            store,
            events,
            pass_lock: Mutex::new(()),
            loop_running: AtomicBool::new(false),
        }
    }

    /// Subscribe to sync progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Run one sync pass over the queue.
    ///
    /// Orders are posted strictly in queue order. Transient failures are
    /// retried with backoff; a failure that survives the retries halts the
    /// pass with everything from that order onward left queued.
    pub async fn sync_pending_orders(&self) -> PosResult<SyncReport> {
        let _guard = self.pass_lock.lock().await;

        let pending = self.store.list_pending()?;
        if pending.is_empty() {
            return Ok(SyncReport {
                synced: Vec::new(),
                failed: None,
            });
        }

        info!(pending = pending.len(), "starting order sync pass");
        let mut report = SyncReport {
            synced: Vec::new(),
            failed: None,
        };

        for entry in pending {
            let order_number = entry.order.order_number.clone();
            match self.post_with_retry(&entry.order).await {
                Ok(_) => {
                    self.store.remove(entry.local_id)?;
                    let _ = self.events.send(SyncEvent::OrderSynced {
                        order_number: order_number.clone(),
                    });
                    report.synced.push(order_number);
                }
                Err(e) => {
                    warn!(
                        order_number = %order_number,
                        error = %e,
                        synced = report.synced.len(),
                        "sync pass halted"
                    );
                    let _ = self.events.send(SyncEvent::SyncHalted {
                        order_number: order_number.clone(),
                        error: e.to_string(),
                    });
                    report.failed = Some((order_number, e));
                    break;
                }
            }
        }

        if report.drained() {
            info!(synced = report.synced.len(), "order queue drained");
            self.refresh_caches().await;
            let _ = self.events.send(SyncEvent::QueueDrained {
                synced: report.synced.len(),
            });
        }

        Ok(report)
    }

    /// POST one order, retrying transient failures with doubling delays.
    async fn post_with_retry(&self, order: &SalesOrder) -> PosResult<SalesOrder> {
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match self.orders.create_sales_order(order).await {
                Ok(copy) => return Ok(copy),
                Err(e) if e.is_transient() && attempt < MAX_RETRIES => {
                    debug!(
                        order_number = %order.order_number,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "transient sync failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// After a full drain the local hints are stale: the server has handed
    /// out new order numbers and may have rolled the shift. Best-effort.
    async fn refresh_caches(&self) {
        match self.orders.new_order_number().await {
            Ok(number) => {
                if let Err(e) = self.store.cache_number_hint(&number) {
                    warn!(error = %e, "failed to cache refreshed order number");
                }
            }
            Err(e) => debug!(error = %e, "order-number refresh skipped"),
        }
        if let Err(e) = self.shifts.get_latest_shift().await {
            debug!(error = %e, "shift refresh skipped");
        }
    }

    /// Spawn the background loop: probe connectivity and drain immediately,
    /// then again every `interval`, logging and broadcasting online/offline
    /// transitions. The immediate first pass is the startup drain; orders
    /// queued during the previous session must not wait a full tick.
    /// Idempotent.
    pub fn start_sync_loop(self: &Arc<Self>, interval: Duration) {
        if self.loop_running.swap(true, Ordering::SeqCst) {
            warn!("sync loop already running");
            return;
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "sync loop started");
            let mut previous_online: Option<bool> = None;

            while engine.loop_running.load(Ordering::SeqCst) {
                let online = engine.probe.is_online().await;
                if previous_online != Some(online) {
                    if online {
                        info!("network restored");
                    } else {
                        warn!("network lost, orders will queue locally");
                    }
                    let _ = engine.events.send(SyncEvent::NetworkStatus { online });
                }
                previous_online = Some(online);

                if online {
                    if let Err(e) = engine.sync_pending_orders().await {
                        warn!(error = %e, "sync pass failed");
                    }
                }

                tokio::time::sleep(interval).await;
            }
            info!("sync loop stopped");
        });
    }

    /// Ask the background loop to stop after its current tick.
    pub fn stop_sync_loop(&self) {
        self.loop_running.store(false, Ordering::SeqCst);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ShiftApi;
    use crate::db::open_in_memory_for_test;
    use crate::models::{Shift, ShiftSummary, SalesOrderStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use uuid::Uuid;

    /// What the fake server does with each successive POST.
    #[derive(Clone, Copy)]
    enum Step {
        Accept,
        Transient,
        Reject,
    }

    struct ScriptedOrderApi {
        script: StdMutex<VecDeque<Step>>,
        create_calls: AtomicUsize,
    }

    impl ScriptedOrderApi {
        fn new(steps: &[Step]) -> Self {
            Self {
                script: StdMutex::new(steps.iter().copied().collect()),
                create_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OrderApi for ScriptedOrderApi {
        async fn create_sales_order(&self, order: &SalesOrder) -> PosResult<SalesOrder> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or(Step::Accept);
            match step {
                Step::Accept => Ok(order.clone()),
                Step::Transient => Err(PosError::Network("server error (HTTP 503)".into())),
                Step::Reject => Err(PosError::Validation("bad payload".into())),
            }
        }

        async fn new_order_number(&self) -> PosResult<String> {
            Ok("SO#0000500".into())
        }
    }

    struct OnlineProbe;

    #[async_trait]
    impl ConnectivityProbe for OnlineProbe {
        async fn is_online(&self) -> bool {
            true
        }
    }

    struct FakeShiftApi;

    #[async_trait]
    impl ShiftApi for FakeShiftApi {
        async fn has_ongoing_shift(&self) -> PosResult<bool> {
            Ok(true)
        }

        async fn start_shift(&self) -> PosResult<Shift> {
            Ok(Shift { shift_id: 1 })
        }

        async fn latest_shift(&self) -> PosResult<Shift> {
            Ok(Shift { shift_id: 1 })
        }

        async fn end_shift(&self) -> PosResult<ShiftSummary> {
            unreachable!("end_shift is not part of sync")
        }
    }

    fn order(number: &str) -> SalesOrder {
        SalesOrder {
            id: None,
            order_number: number.to_string(),
            shift_id: Some(1),
            customer_id: Uuid::new_v4(),
            items: Vec::new(),
            total_amount: 0.0,
            total_discount: 0.0,
            total_tax: 0.0,
            is_visa: false,
            status: SalesOrderStatus::NotReturn,
            note: None,
            so_created_date: Utc::now(),
        }
    }

    fn engine(api: Arc<ScriptedOrderApi>) -> (Arc<OrderSyncEngine>, Arc<LocalOrderStore>) {
        let db = Arc::new(open_in_memory_for_test());
        let store = Arc::new(LocalOrderStore::new(Arc::clone(&db)));
        let shifts = Arc::new(ShiftCoordinator::new(Arc::new(FakeShiftApi), db));
        let engine = Arc::new(OrderSyncEngine::new(
            api as Arc<dyn OrderApi>,
            Arc::new(OnlineProbe),
            shifts,
            Arc::clone(&store),
        ));
        (engine, store)
    }

    #[tokio::test]
    async fn test_full_drain_refreshes_number_hint() {
        let api = Arc::new(ScriptedOrderApi::new(&[Step::Accept, Step::Accept]));
        let (engine, store) = engine(api);
        store.enqueue(order("SO#0000100")).expect("enqueue");
        store.enqueue(order("SO#0000100")).expect("enqueue");

        let mut events = engine.subscribe();
        let report = engine.sync_pending_orders().await.expect("pass");

        assert!(report.drained());
        assert_eq!(report.synced, vec!["SO#0000100", "SO#0000101"]);
        assert_eq!(store.pending_count().expect("count"), 0);
        assert_eq!(
            store.cached_number_hint().expect("hint").as_deref(),
            Some("SO#0000500")
        );

        assert!(matches!(
            events.try_recv().expect("first event"),
            SyncEvent::OrderSynced { .. }
        ));
        assert!(matches!(
            events.try_recv().expect("second event"),
            SyncEvent::OrderSynced { .. }
        ));
        assert!(matches!(
            events.try_recv().expect("third event"),
            SyncEvent::QueueDrained { synced: 2 }
        ));
    }

    #[tokio::test]
    async fn test_pass_halts_on_rejected_order_and_keeps_remainder() {
        // First order accepted, second rejected outright, third never tried.
        let api = Arc::new(ScriptedOrderApi::new(&[Step::Accept, Step::Reject]));
        let (engine, store) = engine(Arc::clone(&api));
        store.enqueue(order("SO#0000100")).expect("enqueue");
        store.enqueue(order("SO#0000100")).expect("enqueue");
        store.enqueue(order("SO#0000100")).expect("enqueue");

        let report = engine.sync_pending_orders().await.expect("pass");

        assert_eq!(report.synced, vec!["SO#0000100"]);
        let (failed_number, failed_err) = report.failed.expect("halted");
        assert_eq!(failed_number, "SO#0000101");
        assert!(matches!(failed_err, PosError::Validation(_)));

        // Only the two attempted orders hit the wire
        assert_eq!(api.create_calls.load(Ordering::SeqCst), 2);

        // The failed order and its successor are still queued, in order
        let remaining: Vec<String> = store
            .list_pending()
            .expect("list")
            .iter()
            .map(|p| p.order.order_number.clone())
            .collect();
        assert_eq!(remaining, vec!["SO#0000101", "SO#0000102"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_with_backoff() {
        let api = Arc::new(ScriptedOrderApi::new(&[
            Step::Transient,
            Step::Transient,
            Step::Accept,
        ]));
        let (engine, store) = engine(Arc::clone(&api));
        store.enqueue(order("SO#0000100")).expect("enqueue");

        let report = engine.sync_pending_orders().await.expect("pass");

        assert!(report.drained());
        assert_eq!(report.synced, vec!["SO#0000100"]);
        // 2 transient failures + 1 success
        assert_eq!(api.create_calls.load(Ordering::SeqCst), 3);
        assert_eq!(store.pending_count().expect("count"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let api = Arc::new(ScriptedOrderApi::new(&[
            Step::Transient,
            Step::Transient,
            Step::Transient,
        ]));
        let (engine, store) = engine(Arc::clone(&api));
        store.enqueue(order("SO#0000100")).expect("enqueue");

        let report = engine.sync_pending_orders().await.expect("pass");

        let (_, err) = report.failed.expect("halted");
        assert!(err.is_transient());
        assert_eq!(api.create_calls.load(Ordering::SeqCst), MAX_RETRIES as usize);
        // The order survives for the next pass
        assert_eq!(store.pending_count().expect("count"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_drains_queue_before_first_sleep() {
        let api = Arc::new(ScriptedOrderApi::new(&[Step::Accept]));
        let (engine, store) = engine(api);
        store.enqueue(order("SO#0000100")).expect("enqueue");

        // Interval far in the future: only the startup pass can drain this.
        engine.start_sync_loop(Duration::from_secs(3600));

        // Yield without touching the clock so the first tick cannot elapse.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        assert_eq!(store.pending_count().expect("count"), 0);
        engine.stop_sync_loop();
    }

    #[tokio::test]
    async fn test_empty_queue_pass_is_a_noop() {
        let api = Arc::new(ScriptedOrderApi::new(&[]));
        let (engine, _store) = engine(Arc::clone(&api));
        let report = engine.sync_pending_orders().await.expect("pass");
        assert!(report.drained());
        assert!(report.synced.is_empty());
        assert_eq!(api.create_calls.load(Ordering::SeqCst), 0);
    }
}
