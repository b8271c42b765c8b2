//! Offline-resilient POS core.
//!
//! Client-side engine for a point-of-sale terminal talking to a back-office
//! server: shift accounting, order submission with a durable offline queue,
//! background queue sync, and stock-taking / stock-transfer sessions. The
//! server stays authoritative for shifts, order numbers, and stock; this
//! crate keeps the terminal usable while it is unreachable and reconciles
//! once it returns.

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod api;
pub mod db;
pub mod error;
pub mod models;
pub mod order_store;
pub mod orders;
pub mod shifts;
pub mod stock_transfer;
pub mod stocktaking;
pub mod sync;

pub use api::{ApiClient, ConnectivityProbe, OrderApi, ShiftApi, StockApi};
pub use error::{PosError, PosResult};
pub use orders::{OrderSubmissionGateway, SubmissionOutcome, SubmittedOrder};
pub use shifts::ShiftCoordinator;
pub use stock_transfer::{StockTransferSession, UNSET_DESTINATION};
pub use stocktaking::StockReconciliationSession;
pub use sync::{OrderSyncEngine, SyncEvent, SyncReport};

/// Initialize structured logging (console + daily rolling file).
///
/// Call once at startup, before constructing any component. The file
/// appender's flush guard is leaked on purpose; the process runs until exit
/// and the non-blocking writer flushes on drop only.
pub fn init_logging(log_dir: &std::path::Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,retail_pos_core=debug"));

    std::fs::create_dir_all(log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(log_dir, "pos");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    std::mem::forget(guard);

    info!("POS core v{} logging initialized", env!("CARGO_PKG_VERSION"));
}
