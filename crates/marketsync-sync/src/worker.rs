//! Cooperative scheduler for the sync tasks.
//!
//! Every registered [`Task`] gets its own loop ticking on the task's interval.
//! A tick runs the task on a fresh tokio task so a panic is contained to that
//! tick; errors are logged and the next tick is the retry. With a lease store
//! configured, a tick only runs while this instance holds the task's lease.

use crate::error::SyncResult;
use async_trait::async_trait;
use marketsync_core::LeaseStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Shortest period a loop ticks at; tokio's `interval` rejects zero
const MIN_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn interval(&self) -> Duration;

    /// One pass over the task's work. Should return promptly once `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> SyncResult<()>;
}

/// Lease settings for running each task on a single instance at a time
#[derive(Clone)]
pub struct LeaseConfig {
    pub store: Arc<dyn LeaseStore>,
    /// Identifies this process in the lease table
    pub holder: String,
    pub ttl: chrono::Duration,
}

/// What happened on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Completed,
    Failed,
    Panicked,
    LeaseHeldElsewhere,
}

pub struct WorkerManager {
    tasks: Vec<Arc<dyn Task>>,
    lease: Option<LeaseConfig>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Default for WorkerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerManager {
    pub fn new() -> Self {
        Self { tasks: Vec::new(), lease: None, cancel: CancellationToken::new(), handles: Vec::new() }
    }

    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.push(task);
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Token cancelled by [`WorkerManager::shutdown`]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn one loop per registered task. Calling it twice is a no-op.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }
        for task in &self.tasks {
            let task = Arc::clone(task);
            let lease = self.lease.clone();
            let cancel = self.cancel.clone();
            let span = tracing::info_span!("worker", task = %task.name());
            self.handles.push(tokio::spawn(run_loop(task, lease, cancel).instrument(span)));
        }
        info!(workers = self.handles.len(), "worker manager started");
    }

    /// Cancel every loop and wait until all of them have returned
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(err) = handle.await {
                error!(error = %err, "worker loop ended abnormally");
            }
        }
        if let Some(lease) = &self.lease {
            for task in &self.tasks {
                if let Err(err) = lease.store.release(task.name(), &lease.holder).await {
                    warn!(task = %task.name(), error = %err, "failed to release lease");
                }
            }
        }
        info!("worker manager stopped");
    }
}

async fn run_loop(task: Arc<dyn Task>, lease: Option<LeaseConfig>, cancel: CancellationToken) {
    let mut ticker = interval(tick_interval(task.as_ref()));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        run_tick(Arc::clone(&task), lease.as_ref(), &cancel).await;
    }
    debug!(task = %task.name(), "worker loop exited");
}

fn tick_interval(task: &dyn Task) -> Duration {
    let requested = task.interval();
    if requested.is_zero() {
        warn!(
            task = %task.name(),
            min_secs = MIN_TICK_INTERVAL.as_secs(),
            "zero interval, using minimum"
        );
        return MIN_TICK_INTERVAL;
    }
    requested
}

/// Run a task once under the same isolation the loop uses
pub async fn run_tick(
    task: Arc<dyn Task>,
    lease: Option<&LeaseConfig>,
    cancel: &CancellationToken,
) -> TickOutcome {
    let name = task.name().to_string();

    if let Some(lease) = lease {
        match lease.store.try_acquire(&name, &lease.holder, lease.ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task = %name, "lease held by another instance, skipping tick");
                return TickOutcome::LeaseHeldElsewhere;
            }
            Err(err) => {
                warn!(task = %name, error = %err, "lease check failed, skipping tick");
                return TickOutcome::LeaseHeldElsewhere;
            }
        }
    }

    let child = cancel.child_token();
    let handle = tokio::spawn(async move { task.run(child).await });
    match handle.await {
        Ok(Ok(())) => TickOutcome::Completed,
        Ok(Err(err)) => {
            error!(task = %name, error = %err, "task run failed");
            TickOutcome::Failed
        }
        Err(join_err) if join_err.is_panic() => {
            error!(task = %name, error = %join_err, "task panicked");
            TickOutcome::Panicked
        }
        Err(join_err) => {
            warn!(task = %name, error = %join_err, "task aborted");
            TickOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use marketsync_store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: &'static str,
        runs: Arc<AtomicUsize>,
        mode: Mode,
        interval: Duration,
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Ok,
        Fail,
        Panic,
    }

    #[async_trait]
    impl Task for Counting {
        fn name(&self) -> &str {
            self.name
        }

        fn interval(&self) -> Duration {
            self.interval
        }

        async fn run(&self, _cancel: CancellationToken) -> SyncResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Ok => Ok(()),
                Mode::Fail => Err(SyncError::Credentials("broken".to_string())),
                Mode::Panic => panic!("boom"),
            }
        }
    }

    fn counting(name: &'static str, mode: Mode) -> (Arc<dyn Task>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let task = Counting { name, runs: runs.clone(), mode, interval: Duration::from_millis(10) };
        (Arc::new(task), runs)
    }

    #[tokio::test]
    async fn test_tick_outcomes() {
        let cancel = CancellationToken::new();
        let (ok, _) = counting("ok", Mode::Ok);
        let (fail, _) = counting("fail", Mode::Fail);
        let (panics, _) = counting("panics", Mode::Panic);

        assert_eq!(run_tick(ok, None, &cancel).await, TickOutcome::Completed);
        assert_eq!(run_tick(fail, None, &cancel).await, TickOutcome::Failed);
        assert_eq!(run_tick(panics, None, &cancel).await, TickOutcome::Panicked);
    }

    #[tokio::test]
    async fn test_panicking_task_keeps_ticking_and_others_run() {
        let (panics, panic_runs) = counting("panics", Mode::Panic);
        let (healthy, healthy_runs) = counting("healthy", Mode::Ok);

        let mut manager = WorkerManager::new();
        manager.register(panics);
        manager.register(healthy);
        manager.start();
        tokio::time::sleep(Duration::from_millis(80)).await;
        manager.shutdown().await;

        assert!(panic_runs.load(Ordering::SeqCst) >= 2);
        assert!(healthy_runs.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_zero_interval_falls_back_to_minimum() {
        let runs = Arc::new(AtomicUsize::new(0));
        let task: Arc<dyn Task> = Arc::new(Counting {
            name: "zero",
            runs: runs.clone(),
            mode: Mode::Ok,
            interval: Duration::ZERO,
        });
        assert_eq!(tick_interval(task.as_ref()), MIN_TICK_INTERVAL);

        let mut manager = WorkerManager::new();
        manager.register(task);
        manager.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.shutdown().await;

        // first tick fires immediately, the next one is a full second away
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_loops() {
        let (task, runs) = counting("ok", Mode::Ok);
        let mut manager = WorkerManager::new();
        manager.register(task);
        manager.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.shutdown().await;

        let after_shutdown = runs.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(runs.load(Ordering::SeqCst), after_shutdown);
    }

    #[tokio::test]
    async fn test_lease_held_elsewhere_skips_tick() {
        let store = Arc::new(MemoryStore::new());
        store
            .try_acquire("ok", "instance-b", chrono::Duration::minutes(5))
            .await
            .unwrap();
        let lease = LeaseConfig {
            store: store.clone(),
            holder: "instance-a".to_string(),
            ttl: chrono::Duration::minutes(5),
        };
        let (task, runs) = counting("ok", Mode::Ok);

        let outcome = run_tick(task.clone(), Some(&lease), &CancellationToken::new()).await;
        assert_eq!(outcome, TickOutcome::LeaseHeldElsewhere);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        store.release("ok", "instance-b").await.unwrap();
        let outcome = run_tick(task, Some(&lease), &CancellationToken::new()).await;
        assert_eq!(outcome, TickOutcome::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_leases() {
        let store = Arc::new(MemoryStore::new());
        let lease = LeaseConfig {
            store: store.clone(),
            holder: "instance-a".to_string(),
            ttl: chrono::Duration::minutes(5),
        };
        let (task, _) = counting("ok", Mode::Ok);
        let mut manager = WorkerManager::new().with_lease(lease);
        manager.register(task);
        manager.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        manager.shutdown().await;

        assert!(store
            .try_acquire("ok", "instance-b", chrono::Duration::minutes(5))
            .await
            .unwrap());
    }
}
