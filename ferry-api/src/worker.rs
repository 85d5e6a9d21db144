use ferry_order::Reconciler;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Runs reconciliation passes forever, one per `every`.
pub async fn start_reconciliation_worker(reconciler: Arc<Reconciler>, every: Duration) {
    info!("Reconciliation worker started, running every {:?}", every);

    let mut ticker = interval(every);
    // A slow pass must not be followed by a burst of catch-up passes
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Err(e) = reconciler.run_once().await {
            error!("Reconciliation pass failed: {}", e);
        }
    }
}
