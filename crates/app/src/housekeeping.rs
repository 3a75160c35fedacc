use std::sync::Arc;
use std::time::Duration;

use spaceshare_api::UploadRateLimiter;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Periodically drops upload windows that have expired. Runs until
/// `shutdown` flips to `true` or its sender is dropped.
pub async fn run(
    limiter: Arc<UploadRateLimiter>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    info!(interval_secs = every.as_secs(), "housekeeping started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = limiter.evict_expired().await;
                let tracked = limiter.tracked_actors().await;
                debug!(evicted, tracked, "evicted idle upload windows");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("housekeeping stopped");
}
