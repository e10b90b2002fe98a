use skyfare_order::SettlementService;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

/// Periodically fails PENDING orders older than `pending_ttl` and returns their stock.
pub async fn start_stale_order_sweeper(
    settlement: Arc<dyn SettlementService>,
    pending_ttl: Duration,
    sweep_interval: Duration,
) {
    let mut ticker = interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "Stale order sweeper started (ttl {:?}, every {:?})",
        pending_ttl, sweep_interval
    );

    loop {
        ticker.tick().await;
        match settlement.expire_stale(pending_ttl).await {
            Ok(0) => {}
            Ok(expired) => info!("Sweeper expired {} PENDING orders", expired),
            Err(e) => error!("Stale order sweep failed: {}", e),
        }
    }
}
