//! Background Maintenance Tasks
//!
//! Periodic sweeps that keep the in-memory tables bounded: expired bans and
//! idle suspicion records, stale rate-limit windows, and timeline entries
//! past retention. Each sweep runs on its own interval and stops on the
//! shutdown broadcast.

use crate::analytics::AnalyticsRecorder;
use crate::security::{IpRecordStore, RateLimiter};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn all maintenance tasks. The returned handles finish once shutdown
/// is signalled.
pub fn spawn_sweepers(
    store: Arc<IpRecordStore>,
    rate_limiter: Arc<RateLimiter>,
    analytics: Arc<AnalyticsRecorder>,
    shutdown: &ShutdownCoordinator,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    let mut shutdown_rx = shutdown.subscribe();
    let store_task = store.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(store_task.sweep_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (removed, evicted) = store_task.sweep();
                    if removed > 0 || evicted > 0 {
                        debug!(
                            "Record sweep: {} expired ban(s), {} idle suspicion record(s)",
                            removed, evicted
                        );
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Record store sweeper stopping");
                    break;
                }
            }
        }
    }));

    let mut shutdown_rx = shutdown.subscribe();
    let limiter_task = rate_limiter.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter_task.cleanup_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => limiter_task.cleanup_old_entries(),
                _ = shutdown_rx.recv() => {
                    info!("Rate limiter sweeper stopping");
                    break;
                }
            }
        }
    }));

    let mut shutdown_rx = shutdown.subscribe();
    let analytics_task = analytics.clone();
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(analytics_task.sweep_interval());
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    analytics_task.prune_timeline();
                }
                _ = shutdown_rx.recv() => {
                    info!("Analytics sweeper stopping");
                    break;
                }
            }
        }
    }));

    handles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::AnalyticsConfig;
    use crate::security::rate_limiter::RateLimitConfig;
    use crate::security::store::RecordStoreConfig;
    use crate::security::BanManager;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sweepers_stop_on_shutdown() {
        let store = Arc::new(IpRecordStore::new(RecordStoreConfig::default()));
        let ban_manager = Arc::new(BanManager::new(store.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), ban_manager));
        let analytics = Arc::new(AnalyticsRecorder::new(AnalyticsConfig::default()));
        let shutdown = ShutdownCoordinator::new(Duration::from_secs(1));

        let handles = spawn_sweepers(store, rate_limiter, analytics, &shutdown);
        shutdown.signal();

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("sweeper did not stop")
                .expect("sweeper panicked");
        }
    }
}
