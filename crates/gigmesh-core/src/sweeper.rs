//! Expiry sweeper: forces stale tasks into a terminal state.
//!
//! Two independent background loops over the same store:
//! - the sweep loop expires Posted tasks (past deadline, or deadline-less
//!   with zero bids beyond the staleness threshold) and emits
//!   `task.cancelled` with a reason tag;
//! - a lower-frequency retention loop hard-deletes terminal tasks older
//!   than the retention window. Bookkeeping, not correctness.
//!
//! Idempotence comes from the store: only Posted tasks match the sweep, so
//! a task transitioned once is never touched again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::LifecycleEvent;
use crate::ports::EventBus;
use crate::store::TaskStore;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Sweep cadence.
    pub interval: Duration,
    /// Age at which a deadline-less, bid-less Posted task expires.
    pub stale_after: chrono::Duration,
    /// Retention cadence.
    pub retention_interval: Duration,
    /// How long terminal tasks are kept before hard deletion.
    pub retain_for: chrono::Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            stale_after: chrono::Duration::days(7),
            retention_interval: Duration::from_secs(6 * 60 * 60),
            retain_for: chrono::Duration::days(30),
        }
    }
}

pub struct ExpirySweeper {
    store: Arc<dyn TaskStore>,
    bus: Arc<EventBus>,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn TaskStore>, bus: Arc<EventBus>, config: SweeperConfig) -> Self {
        Self { store, bus, config }
    }

    /// One sweep pass. Public so maintenance callers and tests can force a
    /// tick without waiting out the interval.
    pub async fn sweep_once(&self) -> usize {
        let expired = self.store.sweep_expired(self.config.stale_after).await;
        for (task, reason) in &expired {
            info!(task_id = %task.id, reason = reason.as_str(), "task expired");
            self.bus.publish(LifecycleEvent::TaskCancelled {
                task_id: task.id,
                reason: *reason,
                requester: task.requester.clone(),
            });
        }
        let count = expired.len();
        if count > 0 {
            info!(count, "expired stale tasks");
        }
        count
    }

    /// One retention pass.
    pub async fn purge_once(&self) -> usize {
        let purged = self.store.purge_terminal(self.config.retain_for).await;
        if purged > 0 {
            info!(purged, "purged old terminal tasks");
        }
        purged
    }

    /// Sweep loop. Runs a pass immediately, then on every interval tick.
    pub(crate) async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        debug!(interval_secs = self.config.interval.as_secs(), "expiry sweeper started");
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// Retention loop. First tick fires immediately; harmless, the window
    /// check decides.
    pub(crate) async fn run_retention(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.retention_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.purge_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CancelReason, TaskDraft, TaskStatus};
    use crate::ports::{Clock, CollectingSink, FixedClock, SystemClock, UlidGenerator};
    use crate::store::InMemoryTaskStore;
    use chrono::Utc;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryTaskStore>,
        sink: Arc<CollectingSink>,
        sweeper: ExpirySweeper,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(FixedClock::new(Utc::now()));
            let store = Arc::new(InMemoryTaskStore::new(
                clock.clone(),
                Arc::new(UlidGenerator::new(SystemClock)),
            ));
            let sink = Arc::new(CollectingSink::new());
            let bus = Arc::new(EventBus::new(vec![
                sink.clone() as Arc<dyn crate::ports::EventSink>,
            ]));
            let sweeper = ExpirySweeper::new(store.clone(), bus, SweeperConfig::default());
            Self {
                clock,
                store,
                sink,
                sweeper,
            }
        }

        async fn post_task(&self, deadline_in: Option<chrono::Duration>) -> crate::domain::TaskId {
            let task = self
                .store
                .create_task(TaskDraft {
                    title: "Translate a README".into(),
                    description: "en -> ja".into(),
                    budget: 20.0,
                    currency: None,
                    deadline: deadline_in.map(|d| self.clock.now() + d),
                    required_capabilities: vec!["translation".into()],
                    requester: "agent-req".into(),
                })
                .await
                .unwrap();
            task.id
        }
    }

    #[tokio::test]
    async fn deadline_expiry_emits_cancelled_exactly_once() {
        let fx = Fixture::new();
        let task_id = fx.post_task(Some(chrono::Duration::seconds(1))).await;

        fx.clock.advance(chrono::Duration::seconds(2));
        assert_eq!(fx.sweeper.sweep_once().await, 1);

        let record = fx.store.get_task(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Expired);

        let cancelled = fx.sink.named("task.cancelled");
        assert_eq!(cancelled.len(), 1);
        match &cancelled[0] {
            LifecycleEvent::TaskCancelled { reason, .. } => {
                assert_eq!(*reason, CancelReason::DeadlineExpired);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // second tick performs no further mutation
        assert_eq!(fx.sweeper.sweep_once().await, 0);
        assert_eq!(fx.sink.named("task.cancelled").len(), 1);
    }

    #[tokio::test]
    async fn stale_bidless_tasks_expire_with_their_own_reason() {
        let fx = Fixture::new();
        fx.post_task(None).await;

        fx.clock.advance(chrono::Duration::days(8));
        assert_eq!(fx.sweeper.sweep_once().await, 1);

        let cancelled = fx.sink.named("task.cancelled");
        match &cancelled[0] {
            LifecycleEvent::TaskCancelled { reason, .. } => {
                assert_eq!(*reason, CancelReason::StaleNoBids);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn sweep_leaves_fresh_and_non_posted_tasks_alone() {
        let fx = Fixture::new();
        // fresh task, far-future deadline
        fx.post_task(Some(chrono::Duration::days(30))).await;
        // cancelled before the sweep: terminal, not the sweeper's business
        let cancelled_id = fx.post_task(None).await;
        fx.store.cancel_task(cancelled_id, "agent-req").await.unwrap();

        fx.clock.advance(chrono::Duration::days(1));
        assert_eq!(fx.sweeper.sweep_once().await, 0);
        assert!(fx.sink.named("task.cancelled").is_empty());
    }

    #[tokio::test]
    async fn retention_purges_old_terminal_tasks_only() {
        let fx = Fixture::new();
        let expired_id = fx.post_task(Some(chrono::Duration::seconds(1))).await;
        fx.clock.advance(chrono::Duration::seconds(2));
        fx.sweeper.sweep_once().await;

        // inside the retention window: kept
        assert_eq!(fx.sweeper.purge_once().await, 0);

        fx.clock.advance(chrono::Duration::days(31));
        assert_eq!(fx.sweeper.purge_once().await, 1);
        assert!(fx.store.get_task(expired_id).await.is_err());
    }

    #[tokio::test]
    async fn run_loop_sweeps_on_its_interval_and_stops_on_shutdown() {
        let fx = Fixture::new();
        let task_id = fx.post_task(Some(chrono::Duration::seconds(1))).await;
        fx.clock.advance(chrono::Duration::seconds(2));

        let config = SweeperConfig {
            interval: Duration::from_millis(20),
            ..SweeperConfig::default()
        };
        let sweeper = Arc::new(ExpirySweeper::new(
            fx.store.clone(),
            Arc::new(EventBus::new(vec![
                fx.sink.clone() as Arc<dyn crate::ports::EventSink>,
            ])),
            config,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let loop_sweeper = sweeper.clone();
        let handle = tokio::spawn(async move {
            loop_sweeper.run(shutdown_rx).await;
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown_tx.send(true);
        handle.await.unwrap();

        assert_eq!(
            fx.store.get_task(task_id).await.unwrap().status,
            TaskStatus::Expired
        );
        assert_eq!(fx.sink.named("task.cancelled").len(), 1);
    }
}
