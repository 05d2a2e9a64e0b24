//! Debounced commit pipeline.
//!
//! State changes are staged as immutable snapshots; a single commit task
//! coalesces them and pushes the newest one to the backend at most once per
//! debounce window. At most one commit is in flight at a time, and failed
//! commits retry with capped exponential backoff while newer snapshots keep
//! superseding older ones.

pub mod service_unit;
pub mod template;

use crate::error::RouterError;
use crate::metrics;
use async_trait::async_trait;
use self::service_unit::CommitSnapshot;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Destination of a committed snapshot.
#[async_trait]
pub trait CommitBackend: Send + Sync {
    async fn commit(&self, snapshot: &CommitSnapshot) -> Result<(), RouterError>;
}

/// Where the commit loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPhase {
    /// Nothing staged since the last successful commit.
    Idle,
    /// A snapshot is staged and waiting out the debounce window.
    Dirty,
    /// A commit is in flight.
    Committing,
}

struct CommitInner {
    phase: CommitPhase,
    /// Newest staged snapshot. Staging replaces it wholesale.
    snapshot: Option<Arc<CommitSnapshot>>,
    /// Set by `stage`, cleared when a commit picks the snapshot up.
    dirty: bool,
    /// Consecutive commit failures, reset on success.
    failures: u32,
}

/// Coalesces staged snapshots into rate-limited backend commits.
pub struct CommitCoordinator {
    inner: Mutex<CommitInner>,
    notify: Notify,
    debounce: Duration,
    commit_timeout: Duration,
    max_backoff: Duration,
}

impl CommitCoordinator {
    pub fn new(debounce: Duration, commit_timeout: Duration, max_backoff: Duration) -> Self {
        Self {
            inner: Mutex::new(CommitInner {
                phase: CommitPhase::Idle,
                snapshot: None,
                dirty: false,
                failures: 0,
            }),
            notify: Notify::new(),
            debounce,
            commit_timeout,
            max_backoff,
        }
    }

    /// Stage a snapshot for the next commit, replacing any staged one. A
    /// snapshot identical to the last committed one is dropped.
    pub fn stage(&self, snapshot: CommitSnapshot) {
        {
            let mut inner = self.lock();
            if inner.phase == CommitPhase::Idle && !inner.dirty {
                if let Some(committed) = &inner.snapshot {
                    if **committed == snapshot {
                        return;
                    }
                }
            }
            inner.snapshot = Some(Arc::new(snapshot));
            inner.dirty = true;
            if inner.phase == CommitPhase::Idle {
                inner.phase = CommitPhase::Dirty;
            }
        }
        self.notify.notify_one();
    }

    pub fn phase(&self) -> CommitPhase {
        self.lock().phase
    }

    /// Run the commit loop until shutdown. Intended to be spawned once.
    pub async fn run<B: CommitBackend>(&self, backend: B, mut shutdown: watch::Receiver<bool>) {
        loop {
            // Wait for something to commit.
            loop {
                if *shutdown.borrow() {
                    return;
                }
                if self.lock().dirty {
                    break;
                }
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }

            // Debounce window starts at the first dirty event; everything
            // staged during it rides the same commit.
            tokio::time::sleep(self.debounce).await;

            let snapshot = {
                let mut inner = self.lock();
                inner.dirty = false;
                inner.phase = CommitPhase::Committing;
                inner.snapshot.clone()
            };
            let Some(snapshot) = snapshot else {
                self.lock().phase = CommitPhase::Idle;
                continue;
            };

            let started = Instant::now();
            let result =
                tokio::time::timeout(self.commit_timeout, backend.commit(&snapshot)).await;
            let elapsed = started.elapsed().as_secs_f64();

            match result {
                Ok(Ok(())) => {
                    metrics::record_commit(elapsed, "success");
                    let mut inner = self.lock();
                    inner.failures = 0;
                    inner.phase = if inner.dirty {
                        CommitPhase::Dirty
                    } else {
                        CommitPhase::Idle
                    };
                    info!(
                        frontends = snapshot.frontends.len(),
                        service_units = snapshot.service_units.len(),
                        elapsed_secs = elapsed,
                        "Committed router state"
                    );
                }
                Ok(Err(e)) => {
                    metrics::record_commit(elapsed, "failure");
                    self.note_failure(&format!("{}", e), &mut shutdown).await;
                }
                Err(_) => {
                    metrics::record_commit(elapsed, "timeout");
                    let e = RouterError::CommitTimeout(self.commit_timeout);
                    self.note_failure(&format!("{}", e), &mut shutdown).await;
                }
            }
        }
    }

    /// Record a failed commit and back off before the retry. The snapshot
    /// stays staged so the retry picks up the newest state. Shutdown cuts the
    /// backoff short.
    async fn note_failure(&self, cause: &str, shutdown: &mut watch::Receiver<bool>) {
        let failures = {
            let mut inner = self.lock();
            inner.failures += 1;
            inner.dirty = true;
            inner.phase = CommitPhase::Dirty;
            inner.failures
        };
        let delay = backoff_delay(failures, self.max_backoff);
        if failures >= 5 {
            error!(failures, cause, "Commit keeps failing, backing off");
        } else {
            warn!(failures, cause, delay_secs = delay.as_secs(), "Commit failed, will retry");
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CommitInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Delay before retry `failures`: 1s doubling per failure, capped.
pub fn backoff_delay(failures: u32, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }
    let exp = failures.saturating_sub(1).min(31);
    let delay = Duration::from_secs(1u64 << exp);
    delay.min(max)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        commits: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait]
    impl CommitBackend for CountingBackend {
        async fn commit(&self, _snapshot: &CommitSnapshot) -> Result<(), RouterError> {
            let n = self.commits.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(RouterError::Commit("synthetic failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn coordinator() -> Arc<CommitCoordinator> {
        Arc::new(CommitCoordinator::new(
            Duration::from_secs(3),
            Duration::from_secs(30),
            Duration::from_secs(60),
        ))
    }

    fn snapshot(host: &str) -> CommitSnapshot {
        let mut snapshot = CommitSnapshot::default();
        snapshot.frontends.insert(
            format!("web:{}", host),
            service_unit::Frontend {
                key: format!("web:{}", host),
                host: host.to_string(),
                ..Default::default()
            },
        );
        snapshot
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let max = Duration::from_secs(60);
        assert_eq!(backoff_delay(0, max), Duration::ZERO);
        assert_eq!(backoff_delay(1, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(7, max), Duration::from_secs(60));
        assert_eq!(backoff_delay(60, max), Duration::from_secs(60));
    }

    #[test]
    fn test_stage_marks_dirty() {
        let coordinator = coordinator();
        assert_eq!(coordinator.phase(), CommitPhase::Idle);

        coordinator.stage(CommitSnapshot::default());

        assert_eq!(coordinator.phase(), CommitPhase::Dirty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_stages_coalesces_into_one_commit() {
        let coordinator = coordinator();
        let commits = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            commits: commits.clone(),
            fail_first: 0,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(backend, shutdown_rx).await })
        };

        // 50 changes inside one debounce window.
        for _ in 0..50 {
            coordinator.stage(CommitSnapshot::default());
        }

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.phase(), CommitPhase::Idle);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_snapshot_after_commit_is_dropped() {
        let coordinator = coordinator();
        let commits = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            commits: commits.clone(),
            fail_first: 0,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(backend, shutdown_rx).await })
        };

        coordinator.stage(CommitSnapshot::default());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        // Same content again must not wake the commit loop.
        coordinator.stage(CommitSnapshot::default());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.phase(), CommitPhase::Idle);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_after_window_triggers_second_commit() {
        let coordinator = coordinator();
        let commits = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            commits: commits.clone(),
            fail_first: 0,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(backend, shutdown_rx).await })
        };

        coordinator.stage(snapshot("first.example.com"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 1);

        coordinator.stage(snapshot("second.example.com"));
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(commits.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let coordinator = coordinator();
        let commits = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            commits: commits.clone(),
            fail_first: usize::MAX,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(backend, shutdown_rx).await })
        };

        coordinator.stage(CommitSnapshot::default());

        // Enough virtual time for the backoff to grow well past the point
        // where the loop spends most of its time sleeping between retries.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(commits.load(Ordering::SeqCst) >= 4);

        // Shutdown mid-backoff must stop the loop without waiting the
        // backoff out.
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(10), runner)
            .await
            .expect("commit loop should stop during backoff")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_commit_retries_until_success() {
        let coordinator = coordinator();
        let commits = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            commits: commits.clone(),
            fail_first: 2,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.run(backend, shutdown_rx).await })
        };

        coordinator.stage(CommitSnapshot::default());

        // Two failures with 1s and 2s backoffs plus three debounce windows
        // all fit comfortably in a minute of virtual time.
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(commits.load(Ordering::SeqCst), 3);
        assert_eq!(coordinator.phase(), CommitPhase::Idle);

        shutdown_tx.send(true).unwrap();
        runner.await.unwrap();
    }
}
