//! Background cleanup task.
//!
//! Runs periodically to drop expired pairing codes and shrink the rate
//! limiter key stores. Expiry is also enforced lazily on access, so the
//! sweep only bounds memory, it never affects correctness.

use crate::server::{ParleyRelay, RelayMetrics};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn the background cleanup task.
///
/// Returns a handle that can be used to abort the task. The task exits
/// immediately when cleanup is disabled in the config.
pub fn spawn_cleanup_task(relay: Arc<ParleyRelay>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !relay.config().cleanup.enabled {
            tracing::info!("cleanup task disabled");
            return;
        }

        let interval_secs = relay.config().cleanup.interval_secs;
        tracing::info!(interval_secs, "cleanup task started");

        let mut timer = interval(Duration::from_secs(interval_secs));
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            run_cleanup_cycle(&relay);
        }
    })
}

/// One sweep: expire stale pairing codes and trim limiter state.
fn run_cleanup_cycle(relay: &ParleyRelay) {
    let swept = relay.pairing().sweep();
    if swept > 0 {
        RelayMetrics::add(&relay.metrics().pairing_expired_total, swept as u64);
        tracing::info!(swept, "expired pairing codes removed");
    } else {
        tracing::debug!("no expired pairing codes");
    }

    relay.limits().shrink();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credentials, DevCredentials};
    use crate::config::Config;
    use crate::storage::{SqliteStorage, Storage};
    use std::sync::atomic::Ordering;

    async fn test_relay(config: Config) -> Arc<ParleyRelay> {
        let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::in_memory().await.unwrap());
        let credentials: Arc<dyn Credentials> = Arc::new(DevCredentials::new());
        Arc::new(ParleyRelay::new(config, storage, credentials))
    }

    #[tokio::test]
    async fn cleanup_cycle_sweeps_expired_codes() {
        let mut config = Config::default();
        config.pairing.ttl_secs = 0;
        let relay = test_relay(config).await;

        relay.generate_pairing().unwrap();
        relay.generate_pairing().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        run_cleanup_cycle(&relay);

        assert_eq!(relay.pairing().len(), 0);
        assert_eq!(
            relay.metrics().pairing_expired_total.load(Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn cleanup_cycle_leaves_live_codes() {
        let relay = test_relay(Config::default()).await;
        relay.generate_pairing().unwrap();

        run_cleanup_cycle(&relay);

        assert_eq!(relay.pairing().len(), 1);
        assert_eq!(
            relay.metrics().pairing_expired_total.load(Ordering::Relaxed),
            0
        );
    }

    #[tokio::test]
    async fn cleanup_task_exits_when_disabled() {
        let mut config = Config::default();
        config.cleanup.enabled = false;
        let relay = test_relay(config).await;

        let handle = spawn_cleanup_task(relay);

        tokio::time::timeout(Duration::from_millis(100), handle)
            .await
            .expect("task should exit when disabled")
            .expect("task should not panic");
    }

    #[tokio::test]
    async fn cleanup_task_runs_until_aborted() {
        let mut config = Config::default();
        config.cleanup.interval_secs = 1;
        let relay = test_relay(config).await;

        let handle = spawn_cleanup_task(Arc::clone(&relay));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
