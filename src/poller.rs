use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{config::Config, store::StateStore};

pub type FetchFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// A resource the dashboard mirrors into a [`StateStore`].
pub trait SnapshotSource<T>: Send + Sync {
    fn fetch(&self) -> FetchFuture<T>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    pub failure_log_throttle: Duration,
}

impl PollerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            failure_log_throttle: Duration::from_secs(30),
        }
    }
}

/// Fetches `source` every `opts.interval` and pushes each successful result into `store`.
///
/// Failed fetches leave the store untouched: observers keep the last good snapshot (or keep
/// waiting for the first one).
pub fn spawn_snapshot_poller<T>(
    opts: PollerOptions,
    source: Arc<dyn SnapshotSource<T>>,
    store: Arc<StateStore<T>>,
) -> tokio::task::JoinHandle<()>
where
    T: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(opts.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut consecutive_failures: u32 = 0;
        let mut last_failure_warn_at: Option<Instant> = None;

        loop {
            interval.tick().await;

            match source.fetch().await {
                Ok(value) => {
                    if consecutive_failures > 0 {
                        info!(
                            source = source.name(),
                            store = store.name(),
                            consecutive_failures, "snapshot source recovered"
                        );
                    } else {
                        debug!(
                            source = source.name(),
                            store = store.name(),
                            "snapshot refreshed"
                        );
                    }
                    consecutive_failures = 0;
                    last_failure_warn_at = None;
                    store.push(value);
                }
                Err(err) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let now = Instant::now();
                    let should_warn = last_failure_warn_at
                        .map(|t| now.duration_since(t) >= opts.failure_log_throttle)
                        .unwrap_or(true);
                    if should_warn {
                        warn!(
                            source = source.name(),
                            store = store.name(),
                            consecutive_failures,
                            error = %err,
                            "snapshot fetch failed"
                        );
                        last_failure_warn_at = Some(now);
                    } else {
                        debug!(
                            source = source.name(),
                            store = store.name(),
                            consecutive_failures,
                            error = %err,
                            "snapshot fetch failed (throttled)"
                        );
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Snapshot, observer};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySource {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl SnapshotSource<usize> for FlakySource {
        fn fetch(&self) -> FetchFuture<usize> {
            let n = self.calls.fetch_add(1, Ordering::Relaxed);
            let fail = n < self.fail_first;
            Box::pin(async move {
                if fail {
                    anyhow::bail!("connection refused");
                }
                Ok(n)
            })
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn opts() -> PollerOptions {
        PollerOptions {
            interval: Duration::from_millis(10),
            failure_log_throttle: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn failing_source_leaves_store_not_loaded() {
        let source = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            fail_first: usize::MAX,
        });
        let store = Arc::new(StateStore::<usize>::new("flaky"));
        let dyn_source: Arc<dyn SnapshotSource<usize>> = source.clone();
        let task = spawn_snapshot_poller(opts(), dyn_source, store.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while source.calls.load(Ordering::Relaxed) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(store.current(), Snapshot::NotLoaded);
        task.abort();
    }

    #[tokio::test]
    async fn recovered_source_pushes_to_observers() {
        let source: Arc<dyn SnapshotSource<usize>> = Arc::new(FlakySource {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        });
        let store = Arc::new(StateStore::<usize>::new("flaky"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        store.subscribe(&observer(move |v: &Arc<usize>| {
            seen_clone.lock().unwrap().push(**v);
        }));

        let task = spawn_snapshot_poller(opts(), source, store.clone());

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        task.abort();

        let seen = seen.lock().unwrap().clone();
        // The first two fetches failed and were never delivered.
        assert_eq!(&seen[..2], &[2, 3]);
        assert!(store.current().is_loaded());
    }
}
