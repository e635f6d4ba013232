//! Sync scheduler for periodic integration synchronization
//!
//! Drives one recurring timer per scheduled adapter and executes runs with
//! bounded retries. The per-adapter gate in the registry guarantees that no
//! two runs for the same adapter overlap: a tick that finds a run in flight
//! is dropped and counted, and a manual trigger is rejected with
//! `AlreadyRunning`.
//!
//! Every attempt executes on its own task so a panicking sync function is
//! contained. Shutdown stops all timers, then waits for in-flight runs; with
//! a deadline, runs still going when it expires are cancelled and recorded as
//! `Failure{"shutdown"}`.

use chrono::Utc;
use rand::Rng;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerSection, MAX_DELAY_SECS};
use crate::error::{IntegrationError, OrchestratorError, RetryableError};
use crate::integrations::Integration;
use crate::models::{RunOutcome, RunState, SyncResult};
use crate::otel::SyncMetrics;
use crate::sync::registry::{RegisterOptions, RegistryEntry, SyncFn, SyncRegistry};
use crate::sync::retry::{BackoffSchedule, RetryFailure, RetryManager};

/// Failure reason recorded for runs abandoned at shutdown
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Failure reason recorded for sync functions that panicked
pub const PANIC_REASON: &str = "sync panicked";

/// Longest accepted auto-sync interval
pub const MAX_INTERVAL: Duration = Duration::from_secs(MAX_DELAY_SECS);

/// Configuration for the sync scheduler
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Extra delay before an adapter's first tick
    pub initial_delay: Duration,
    /// Upper bound of the random delay added to an adapter's first tick
    pub jitter: Duration,
    /// Delays between run-level attempts
    pub backoff: BackoffSchedule,
}

impl From<&SchedulerSection> for SchedulerConfig {
    fn from(section: &SchedulerSection) -> Self {
        Self {
            initial_delay: Duration::from_secs(section.initial_delay_secs),
            jitter: Duration::from_secs(section.jitter_secs),
            backoff: BackoffSchedule::from_millis(&section.backoff_ms),
        }
    }
}

/// What a timer tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A run was started
    Started,
    /// A run was already in flight (or the scheduler is stopping)
    Skipped,
    /// No adapter with that name
    Unknown,
}

/// Recurring timer for one adapter
struct ScheduleHandle {
    interval: Duration,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ScheduleHandle {
    fn cancel(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct Inner {
    config: SchedulerConfig,
    registry: Arc<SyncRegistry>,
    schedules: Mutex<HashMap<String, ScheduleHandle>>,
    tracker: TaskTracker,
    timers: CancellationToken,
    runs: CancellationToken,
    shutting_down: AtomicBool,
    metrics: Option<Arc<SyncMetrics>>,
}

/// Scheduler for registered adapters
///
/// Cheap to clone; clones share the same registry and timers.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for SyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncScheduler")
            .field("config", &self.inner.config)
            .field("adapters", &self.inner.registry.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl SyncScheduler {
    /// Create a scheduler over a registry
    pub fn new(registry: Arc<SyncRegistry>, config: SchedulerConfig) -> Self {
        Self::build(registry, config, None)
    }

    /// Create a scheduler that records run metrics
    pub fn with_metrics(
        registry: Arc<SyncRegistry>,
        config: SchedulerConfig,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self::build(registry, config, Some(metrics))
    }

    fn build(
        registry: Arc<SyncRegistry>,
        config: SchedulerConfig,
        metrics: Option<Arc<SyncMetrics>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                schedules: Mutex::new(HashMap::new()),
                tracker: TaskTracker::new(),
                timers: CancellationToken::new(),
                runs: CancellationToken::new(),
                shutting_down: AtomicBool::new(false),
                metrics,
            }),
        }
    }

    /// Registry the scheduler drives
    pub fn registry(&self) -> &Arc<SyncRegistry> {
        &self.inner.registry
    }

    /// Whether `shutdown` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Register a sync function, scheduling it if `options.interval` is set
    pub fn register(
        &self,
        name: &str,
        sync_fn: SyncFn,
        options: RegisterOptions,
    ) -> Result<(), OrchestratorError> {
        self.ensure_running()?;
        check_interval(name, options.interval)?;
        let interval = options.interval;
        let replaced = self.inner.registry.register(name, sync_fn, options)?;
        self.after_register(name, replaced.is_some(), interval)
    }

    /// Register an adapter, scheduling it if `options.interval` is set
    pub fn register_integration(
        &self,
        integration: Arc<dyn Integration>,
        options: RegisterOptions,
    ) -> Result<(), OrchestratorError> {
        self.ensure_running()?;
        let name = integration.name().to_string();
        check_interval(&name, options.interval)?;
        let interval = options.interval;
        let replaced = self
            .inner
            .registry
            .register_integration(integration, options)?;
        self.after_register(&name, replaced.is_some(), interval)
    }

    fn after_register(
        &self,
        name: &str,
        replaced: bool,
        interval: Option<Duration>,
    ) -> Result<(), OrchestratorError> {
        if replaced {
            self.inner.cancel_schedule(name);
        }
        match interval {
            Some(interval) => self.schedule_auto_sync(name, interval),
            None => Ok(()),
        }
    }

    /// Start (or restart) the recurring timer for an adapter
    pub fn schedule_auto_sync(
        &self,
        name: &str,
        interval: Duration,
    ) -> Result<(), OrchestratorError> {
        self.ensure_running()?;
        check_interval(name, Some(interval))?;
        let entry = self
            .inner
            .registry
            .entry(name)
            .ok_or_else(|| OrchestratorError::UnknownAdapter(name.to_string()))?;

        let max_jitter_ms = self.inner.config.jitter.as_millis() as u64;
        let jitter = if max_jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..max_jitter_ms))
        } else {
            Duration::ZERO
        };
        let first_tick = self
            .inner
            .config
            .initial_delay
            .checked_add(jitter)
            .and_then(|delay| delay.checked_add(interval))
            .and_then(|delay| Instant::now().checked_add(delay))
            .ok_or_else(|| OrchestratorError::InvalidInterval(name.to_string()))?;

        let cancel = self.inner.timers.child_token();
        let task = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            entry.clone(),
            first_tick,
            interval,
            cancel.clone(),
        ));

        let handle = ScheduleHandle {
            interval,
            cancel,
            task,
        };

        // Checked under the schedules lock so a concurrent unregister either
        // sees this handle or makes us back out
        let previous = {
            let mut schedules = self.inner.lock_schedules();
            if !self.inner.registry.is_current(&entry) {
                drop(schedules);
                handle.cancel();
                debug!(adapter = name, "Adapter detached while scheduling");
                return Err(OrchestratorError::UnknownAdapter(name.to_string()));
            }
            schedules.insert(name.to_string(), handle)
        };
        if let Some(previous) = previous {
            previous.cancel();
        }
        entry.set_scheduled(interval);

        info!(
            adapter = name,
            interval_ms = interval.as_millis() as u64,
            jitter_ms = jitter.as_millis() as u64,
            "Scheduled auto sync"
        );
        Ok(())
    }

    /// Single entry point for timer ticks
    ///
    /// Starts a run in the background if the adapter is idle; otherwise the
    /// tick is dropped and counted as skipped.
    pub fn fire_tick(&self, name: &str) -> TickOutcome {
        match self.inner.registry.entry(name) {
            Some(entry) => self.inner.fire(entry),
            None => {
                debug!(adapter = name, "Tick for unknown adapter");
                TickOutcome::Unknown
            }
        }
    }

    /// Run an adapter now and wait for the outcome
    ///
    /// Rejects with `AlreadyRunning` if a run is in flight; the trigger is
    /// not queued. The run continues to completion even if the caller stops
    /// waiting.
    pub async fn trigger_now(&self, name: &str) -> Result<RunOutcome, OrchestratorError> {
        self.ensure_running()?;
        let entry = self
            .inner
            .registry
            .entry(name)
            .ok_or_else(|| OrchestratorError::UnknownAdapter(name.to_string()))?;

        if !entry.try_begin() {
            debug!(adapter = name, "Manual trigger rejected, run in flight");
            return Err(OrchestratorError::AlreadyRunning(name.to_string()));
        }

        info!(adapter = name, "Manual sync triggered");
        let handle = self
            .inner
            .tracker
            .spawn(execute_run(self.inner.clone(), entry));
        handle.await.map_err(|_| OrchestratorError::ShuttingDown)
    }

    /// Remove an adapter and cancel its timer; no-op if absent
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.inner.registry.unregister(name);
        self.inner.cancel_schedule(name);
        removed.is_some()
    }

    /// Cancel an adapter's timer without unregistering it
    pub fn cancel_auto_sync(&self, name: &str) -> bool {
        let cancelled = self.inner.cancel_schedule(name);
        if cancelled {
            if let Some(entry) = self.inner.registry.entry(name) {
                entry.clear_scheduled();
            }
        }
        cancelled
    }

    /// Interval of an active timer
    pub fn scheduled_interval(&self, name: &str) -> Option<Duration> {
        self.inner.lock_schedules().get(name).map(|h| h.interval)
    }

    /// Stop all timers and wait for in-flight runs
    ///
    /// Without a deadline, runs finish normally. With one, runs still in
    /// flight when it expires are cancelled mid-attempt or mid-backoff and
    /// settle to `Idle` with `Failure{"shutdown"}`.
    pub async fn shutdown(&self, deadline: Option<Duration>) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
        }

        let schedules: Vec<_> = self.inner.lock_schedules().drain().collect();
        info!(timers = schedules.len(), "Shutting down sync scheduler");
        for (name, handle) in schedules {
            handle.cancel();
            if let Some(entry) = self.inner.registry.entry(&name) {
                entry.clear_scheduled();
            }
        }
        self.inner.timers.cancel();
        self.inner.tracker.close();

        match deadline {
            None => self.inner.tracker.wait().await,
            Some(deadline) => {
                if tokio::time::timeout(deadline, self.inner.tracker.wait())
                    .await
                    .is_err()
                {
                    warn!(
                        deadline_ms = deadline.as_millis() as u64,
                        in_flight = self.inner.tracker.len(),
                        "Shutdown deadline reached, abandoning in-flight runs"
                    );
                    self.inner.runs.cancel();
                    self.inner.tracker.wait().await;
                }
            }
        }

        info!("Sync scheduler stopped");
    }

    fn ensure_running(&self) -> Result<(), OrchestratorError> {
        if self.is_shutting_down() {
            Err(OrchestratorError::ShuttingDown)
        } else {
            Ok(())
        }
    }
}

impl Inner {
    fn lock_schedules(&self) -> MutexGuard<'_, HashMap<String, ScheduleHandle>> {
        self.schedules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cancel_schedule(&self, name: &str) -> bool {
        let handle = self.lock_schedules().remove(name);
        match handle {
            Some(handle) => {
                handle.cancel();
                debug!(adapter = name, "Cancelled auto sync");
                true
            }
            None => false,
        }
    }

    fn fire(self: &Arc<Self>, entry: Arc<RegistryEntry>) -> TickOutcome {
        if self.shutting_down.load(Ordering::SeqCst) {
            return TickOutcome::Skipped;
        }

        if !entry.try_begin() {
            let skipped = entry.record_skipped_tick();
            warn!(
                adapter = entry.name(),
                skipped_ticks = skipped,
                "Previous run still in flight; skipping tick"
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_skipped_tick(entry.name());
            }
            return TickOutcome::Skipped;
        }

        self.tracker.spawn(execute_run(self.clone(), entry));
        TickOutcome::Started
    }
}

fn check_interval(name: &str, interval: Option<Duration>) -> Result<(), OrchestratorError> {
    match interval {
        Some(interval) if interval.is_zero() || interval > MAX_INTERVAL => {
            Err(OrchestratorError::InvalidInterval(name.to_string()))
        }
        _ => Ok(()),
    }
}

async fn run_timer(
    inner: Weak<Inner>,
    entry: Arc<RegistryEntry>,
    first_tick: Instant,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(first_tick, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                if !inner.registry.is_current(&entry) {
                    break;
                }
                debug!(adapter = entry.name(), "Auto sync tick");
                inner.fire(entry.clone());
            }
        }
    }

    debug!(adapter = entry.name(), "Auto sync timer stopped");
}

/// Error of a single attempt, as seen by the run-level retry loop
#[derive(Debug)]
enum AttemptError {
    Sync(IntegrationError),
    Panicked,
    Aborted,
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Sync(err) => write!(f, "{}", err),
            AttemptError::Panicked => write!(f, "{}", PANIC_REASON),
            AttemptError::Aborted => write!(f, "sync aborted"),
        }
    }
}

impl RetryableError for AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Sync(err) => err.is_retryable(),
            AttemptError::Panicked | AttemptError::Aborted => false,
        }
    }
}

/// Attempt task that is aborted when dropped
struct AttemptTask(JoinHandle<Result<SyncResult, IntegrationError>>);

impl AttemptTask {
    fn spawn(sync_fn: &SyncFn) -> Self {
        Self(tokio::spawn(sync_fn()))
    }

    async fn join(mut self) -> Result<SyncResult, AttemptError> {
        match (&mut self.0).await {
            Ok(result) => result.map_err(AttemptError::Sync),
            Err(err) if err.is_panic() => Err(AttemptError::Panicked),
            Err(_) => Err(AttemptError::Aborted),
        }
    }
}

impl Drop for AttemptTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Execute one run for an entry whose gate is already held
async fn execute_run(inner: Arc<Inner>, entry: Arc<RegistryEntry>) -> RunOutcome {
    let name = entry.name().to_string();
    let started = Instant::now();
    let retry = RetryManager::new(entry.retry_budget(), inner.config.backoff.clone());
    let sync_fn = entry.sync_fn();

    info!(adapter = %name, retry_budget = retry.max_retries(), "Starting sync run");

    let attempted = retry
        .execute_cancellable(
            &inner.runs,
            |attempt| {
                entry.set_state(RunState::Running);
                debug!(adapter = %name, attempt, "Sync attempt");
                if let Some(metrics) = &inner.metrics {
                    metrics.record_attempt(&name);
                }
                AttemptTask::spawn(&sync_fn).join()
            },
            |attempt, delay, err| {
                entry.set_state(RunState::Backoff);
                warn!(
                    adapter = %name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %err,
                    "Sync attempt failed, backing off"
                );
            },
        )
        .await;

    let duration = started.elapsed();
    let (succeeded, error, result) = match attempted.result {
        Ok(result) => (true, None, Some(result)),
        Err(RetryFailure::Failed(err)) => {
            if matches!(err, AttemptError::Panicked) {
                error!(adapter = %name, attempt = attempted.attempts, "Sync function panicked");
            }
            (false, Some(err.to_string()), None)
        }
        Err(RetryFailure::Cancelled) => (false, Some(SHUTDOWN_REASON.to_string()), None),
    };

    let outcome = RunOutcome {
        adapter: name.clone(),
        succeeded,
        attempts: attempted.attempts,
        error,
        duration_ms: duration.as_millis() as u64,
        result,
    };
    entry.finish(&outcome, Utc::now());

    if let Some(metrics) = &inner.metrics {
        metrics.record_run(&name, succeeded, duration);
    }

    match &outcome.result {
        Some(result) if result.skipped => {
            info!(
                adapter = %name,
                attempts = outcome.attempts,
                duration_ms = outcome.duration_ms,
                "Sync completed, nothing new"
            );
        }
        Some(result) => {
            info!(
                adapter = %name,
                attempts = outcome.attempts,
                records = result.records_updated,
                duration_ms = outcome.duration_ms,
                "Sync completed"
            );
        }
        None => {
            warn!(
                adapter = %name,
                attempts = outcome.attempts,
                error = outcome.error.as_deref().unwrap_or_default(),
                duration_ms = outcome.duration_ms,
                "Sync run failed"
            );
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::models::LastResult;
    use crate::sync::registry::sync_fn;
    use std::sync::atomic::AtomicU32;

    fn scheduler() -> SyncScheduler {
        SyncScheduler::new(
            Arc::new(SyncRegistry::new()),
            SchedulerConfig {
                backoff: BackoffSchedule::from_millis(&[10]),
                ..SchedulerConfig::default()
            },
        )
    }

    /// Sync function that counts calls and fails the first `failures` of them
    fn flaky(calls: Arc<AtomicU32>, failures: u32, error: SyncError) -> SyncFn {
        sync_fn(move || {
            let calls = calls.clone();
            let error = error.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < failures {
                    Err(IntegrationError::Request(error))
                } else {
                    Ok(SyncResult::success(3))
                }
            }
        })
    }

    /// Sync function that sleeps and tracks peak concurrency
    fn slow(delay: Duration, active: Arc<AtomicU32>, peak: Arc<AtomicU32>) -> SyncFn {
        sync_fn(move || {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                active.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, IntegrationError>(SyncResult::success(1))
            }
        })
    }

    async fn explode() -> Result<SyncResult, IntegrationError> {
        panic!("sync exploded")
    }

    async fn wait_idle(scheduler: &SyncScheduler, name: &str) {
        for _ in 0..1000 {
            if scheduler
                .registry()
                .get(name)
                .is_some_and(|d| d.state == RunState::Idle && d.total_runs > 0)
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("adapter {} never settled", name);
    }

    // Test 1: Always-failing sync makes exactly N+1 attempts
    #[tokio::test]
    async fn test_exhausts_retry_budget() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "hubspot",
                flaky(calls.clone(), u32::MAX, SyncError::HttpError(503)),
                RegisterOptions::default().with_retries(2),
            )
            .unwrap();

        let outcome = scheduler.trigger_now("hubspot").await.unwrap();

        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let descriptor = scheduler.registry().get("hubspot").unwrap();
        assert_eq!(descriptor.state, RunState::Idle);
        assert_eq!(
            descriptor.last_result,
            Some(LastResult::failure("Request failed: HTTP error: 503"))
        );
        assert_eq!(descriptor.consecutive_failures, 1);
    }

    // Test 2: First success ends the run
    #[tokio::test]
    async fn test_success_on_attempt_k_stops_retrying() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "calendar",
                flaky(calls.clone(), 1, SyncError::Timeout),
                RegisterOptions::default().with_retries(4),
            )
            .unwrap();

        let outcome = scheduler.trigger_now("calendar").await.unwrap();

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.result, Some(SyncResult::success(3)));
        assert_eq!(outcome.error, None);
    }

    // Test 3: Fireflies scenario: fails twice, succeeds on the third attempt
    #[tokio::test]
    async fn test_fireflies_succeeds_on_third_attempt() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "fireflies",
                flaky(calls.clone(), 2, SyncError::HttpError(502)),
                RegisterOptions::default()
                    .with_retries(2)
                    .with_interval(Duration::from_millis(1_800_000)),
            )
            .unwrap();

        let outcome = scheduler.trigger_now("fireflies").await.unwrap();

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 3);
        let descriptor = scheduler.registry().get("fireflies").unwrap();
        assert_eq!(descriptor.last_result, Some(LastResult::Success));
        assert!(descriptor.schedule_active);
        assert_eq!(descriptor.interval_ms, Some(1_800_000));

        scheduler.shutdown(None).await;
    }

    // Test 4: Permanent errors are not retried
    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "drive",
                flaky(calls.clone(), u32::MAX, SyncError::HttpError(401)),
                RegisterOptions::default().with_retries(3),
            )
            .unwrap();

        let outcome = scheduler.trigger_now("drive").await.unwrap();

        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // Test 5: Unknown adapter leaves the registry unchanged
    #[tokio::test]
    async fn test_trigger_unknown_adapter() {
        let scheduler = scheduler();
        scheduler
            .register(
                "hubspot",
                flaky(Arc::new(AtomicU32::new(0)), 0, SyncError::Timeout),
                RegisterOptions::default(),
            )
            .unwrap();
        let before = scheduler.registry().list();

        let err = scheduler.trigger_now("unknown").await.unwrap_err();

        assert_eq!(err, OrchestratorError::UnknownAdapter("unknown".to_string()));
        assert_eq!(scheduler.registry().list(), before);
        assert_eq!(scheduler.fire_tick("unknown"), TickOutcome::Unknown);
    }

    // Test 6: Overlapping ticks are skipped, not queued
    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let scheduler = scheduler();
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "fireflies",
                slow(Duration::from_millis(200), active.clone(), peak.clone()),
                RegisterOptions::default(),
            )
            .unwrap();

        assert_eq!(scheduler.fire_tick("fireflies"), TickOutcome::Started);
        assert_eq!(scheduler.fire_tick("fireflies"), TickOutcome::Skipped);

        wait_idle(&scheduler, "fireflies").await;
        let descriptor = scheduler.registry().get("fireflies").unwrap();
        assert_eq!(descriptor.total_runs, 1);
        assert_eq!(descriptor.skipped_ticks, 1);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    // Test 7: Manual trigger during a run is rejected
    #[tokio::test]
    async fn test_trigger_while_running_rejected() {
        let scheduler = scheduler();
        scheduler
            .register(
                "hubspot",
                slow(
                    Duration::from_millis(200),
                    Arc::new(AtomicU32::new(0)),
                    Arc::new(AtomicU32::new(0)),
                ),
                RegisterOptions::default(),
            )
            .unwrap();

        assert_eq!(scheduler.fire_tick("hubspot"), TickOutcome::Started);
        let err = scheduler.trigger_now("hubspot").await.unwrap_err();
        assert_eq!(err, OrchestratorError::AlreadyRunning("hubspot".to_string()));

        wait_idle(&scheduler, "hubspot").await;
        assert!(scheduler.trigger_now("hubspot").await.unwrap().succeeded);
    }

    // Test 8: Timers fire repeatedly but never overlap
    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_never_overlap() {
        let scheduler = scheduler();
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "calendar",
                slow(Duration::from_millis(2500), active.clone(), peak.clone()),
                RegisterOptions::default().with_interval(Duration::from_secs(1)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(7200)).await;

        let descriptor = scheduler.registry().get("calendar").unwrap();
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(descriptor.total_runs >= 1);
        assert!(descriptor.skipped_ticks >= 1);

        scheduler.shutdown(None).await;
    }

    // Test 9: Unregister stops all future ticks
    #[tokio::test(start_paused = true)]
    async fn test_unregister_stops_ticks() {
        let scheduler = scheduler();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "drive",
                flaky(calls.clone(), 0, SyncError::Timeout),
                RegisterOptions::default().with_interval(Duration::from_secs(10)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(25)).await;
        let before = calls.load(Ordering::SeqCst);
        assert_eq!(before, 2);

        assert!(scheduler.unregister("drive"));
        assert_eq!(scheduler.scheduled_interval("drive"), None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
        assert!(scheduler.registry().get("drive").is_none());
        assert!(!scheduler.unregister("drive"));
    }

    // Test 10: Replacing a registration cancels the old timer
    #[tokio::test(start_paused = true)]
    async fn test_replace_cancels_old_schedule() {
        let scheduler = scheduler();
        let old_calls = Arc::new(AtomicU32::new(0));
        let new_calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "hubspot",
                flaky(old_calls.clone(), 0, SyncError::Timeout),
                RegisterOptions::default().with_interval(Duration::from_secs(5)),
            )
            .unwrap();

        scheduler
            .register(
                "hubspot",
                flaky(new_calls.clone(), 0, SyncError::Timeout),
                RegisterOptions::default().replacing(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(old_calls.load(Ordering::SeqCst), 0);
        assert_eq!(new_calls.load(Ordering::SeqCst), 0);
        assert!(!scheduler.registry().get("hubspot").unwrap().schedule_active);
    }

    // Test 11: A panicking sync is isolated
    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let scheduler = scheduler();
        scheduler
            .register(
                "broken",
                sync_fn(explode),
                RegisterOptions::default().with_retries(2),
            )
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "healthy",
                flaky(calls.clone(), 0, SyncError::Timeout),
                RegisterOptions::default(),
            )
            .unwrap();

        let outcome = scheduler.trigger_now("broken").await.unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.as_deref(), Some(PANIC_REASON));

        let descriptor = scheduler.registry().get("broken").unwrap();
        assert_eq!(descriptor.state, RunState::Idle);
        assert_eq!(descriptor.last_result, Some(LastResult::failure(PANIC_REASON)));

        assert!(scheduler.trigger_now("healthy").await.unwrap().succeeded);
    }

    // Test 12: Graceful shutdown lets runs finish
    #[tokio::test]
    async fn test_graceful_shutdown_waits_for_runs() {
        let scheduler = scheduler();
        scheduler
            .register(
                "fireflies",
                slow(
                    Duration::from_millis(100),
                    Arc::new(AtomicU32::new(0)),
                    Arc::new(AtomicU32::new(0)),
                ),
                RegisterOptions::default().with_interval(Duration::from_secs(3600)),
            )
            .unwrap();

        assert_eq!(scheduler.fire_tick("fireflies"), TickOutcome::Started);
        scheduler.shutdown(None).await;

        let descriptor = scheduler.registry().get("fireflies").unwrap();
        assert_eq!(descriptor.state, RunState::Idle);
        assert_eq!(descriptor.last_result, Some(LastResult::Success));
        assert!(!descriptor.schedule_active);
        assert_eq!(
            scheduler.trigger_now("fireflies").await.unwrap_err(),
            OrchestratorError::ShuttingDown
        );
        assert_eq!(
            scheduler
                .schedule_auto_sync("fireflies", Duration::from_secs(1))
                .unwrap_err(),
            OrchestratorError::ShuttingDown
        );
    }

    // Test 13: Hard deadline abandons in-flight runs
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deadline_abandons_runs() {
        let scheduler = scheduler();
        scheduler
            .register(
                "hubspot",
                slow(
                    Duration::from_secs(600),
                    Arc::new(AtomicU32::new(0)),
                    Arc::new(AtomicU32::new(0)),
                ),
                RegisterOptions::default(),
            )
            .unwrap();

        assert_eq!(scheduler.fire_tick("hubspot"), TickOutcome::Started);
        tokio::task::yield_now().await;

        let start = Instant::now();
        scheduler.shutdown(Some(Duration::from_secs(2))).await;
        assert!(start.elapsed() < Duration::from_secs(600));

        let descriptor = scheduler.registry().get("hubspot").unwrap();
        assert_eq!(descriptor.state, RunState::Idle);
        assert_eq!(
            descriptor.last_result,
            Some(LastResult::failure(SHUTDOWN_REASON))
        );
    }

    // Test 14: Hard deadline also interrupts backoff
    #[tokio::test(start_paused = true)]
    async fn test_shutdown_deadline_interrupts_backoff() {
        let scheduler = SyncScheduler::new(
            Arc::new(SyncRegistry::new()),
            SchedulerConfig {
                backoff: BackoffSchedule::from_millis(&[300_000]),
                ..SchedulerConfig::default()
            },
        );
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "calendar",
                flaky(calls.clone(), u32::MAX, SyncError::Timeout),
                RegisterOptions::default().with_retries(3),
            )
            .unwrap();

        scheduler.fire_tick("calendar");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            scheduler.registry().get("calendar").unwrap().state,
            RunState::Backoff
        );

        scheduler.shutdown(Some(Duration::from_secs(1))).await;

        let descriptor = scheduler.registry().get("calendar").unwrap();
        assert_eq!(descriptor.state, RunState::Idle);
        assert_eq!(
            descriptor.last_result,
            Some(LastResult::failure(SHUTDOWN_REASON))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    // Test 15: Zero interval and unknown names are rejected
    #[tokio::test]
    async fn test_schedule_auto_sync_validation() {
        let scheduler = scheduler();
        assert_eq!(
            scheduler
                .schedule_auto_sync("missing", Duration::from_secs(1))
                .unwrap_err(),
            OrchestratorError::UnknownAdapter("missing".to_string())
        );

        scheduler
            .register(
                "drive",
                flaky(Arc::new(AtomicU32::new(0)), 0, SyncError::Timeout),
                RegisterOptions::default(),
            )
            .unwrap();
        assert_eq!(
            scheduler
                .schedule_auto_sync("drive", Duration::ZERO)
                .unwrap_err(),
            OrchestratorError::InvalidInterval("drive".to_string())
        );

        scheduler
            .schedule_auto_sync("drive", Duration::from_secs(30))
            .unwrap();
        assert_eq!(
            scheduler.scheduled_interval("drive"),
            Some(Duration::from_secs(30))
        );
        assert!(scheduler.cancel_auto_sync("drive"));
        assert!(!scheduler.registry().get("drive").unwrap().schedule_active);
    }

    // Test 16: Not-configured adapters surface as run failures
    #[tokio::test]
    async fn test_not_configured_is_run_failure() {
        let scheduler = scheduler();
        scheduler
            .register(
                "fireflies",
                sync_fn(|| async {
                    Err::<SyncResult, _>(IntegrationError::NotConfigured(
                        "missing api key".to_string(),
                    ))
                }),
                RegisterOptions::default().with_retries(2),
            )
            .unwrap();

        let outcome = scheduler.trigger_now("fireflies").await.unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Integration not configured: missing api key")
        );
    }

    // Test 17: Replacing a running adapter never starts a second run
    #[tokio::test]
    async fn test_replace_during_run_keeps_single_run() {
        let scheduler = scheduler();
        let active = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                "hubspot",
                slow(Duration::from_millis(300), active.clone(), peak.clone()),
                RegisterOptions::default(),
            )
            .unwrap();
        assert_eq!(scheduler.fire_tick("hubspot"), TickOutcome::Started);

        scheduler
            .register(
                "hubspot",
                slow(Duration::from_millis(300), active.clone(), peak.clone()),
                RegisterOptions::default().replacing(),
            )
            .unwrap();
        assert_eq!(scheduler.fire_tick("hubspot"), TickOutcome::Skipped);
        assert_eq!(
            scheduler.trigger_now("hubspot").await.unwrap_err(),
            OrchestratorError::AlreadyRunning("hubspot".to_string())
        );

        // Same after unregister and a fresh registration
        scheduler.unregister("hubspot");
        scheduler
            .register(
                "hubspot",
                slow(Duration::from_millis(300), active.clone(), peak.clone()),
                RegisterOptions::default(),
            )
            .unwrap();
        assert_eq!(scheduler.fire_tick("hubspot"), TickOutcome::Skipped);

        // Once the detached run settles the name is free again
        for _ in 0..200 {
            if !scheduler.registry().entry("hubspot").unwrap().name_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let outcome = scheduler.trigger_now("hubspot").await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.registry().get("hubspot").unwrap().skipped_ticks, 1);
    }

    // Test 18: Intervals that cannot be scheduled are rejected, not panicked on
    #[tokio::test]
    async fn test_oversized_interval_rejected() {
        let scheduler = scheduler();
        assert_eq!(
            scheduler
                .register(
                    "drive",
                    flaky(Arc::new(AtomicU32::new(0)), 0, SyncError::Timeout),
                    RegisterOptions::default()
                        .with_interval(Duration::from_secs(u64::MAX / 2)),
                )
                .unwrap_err(),
            OrchestratorError::InvalidInterval("drive".to_string())
        );
        assert!(!scheduler.registry().contains("drive"));

        let delayed = SyncScheduler::new(
            Arc::new(SyncRegistry::new()),
            SchedulerConfig {
                initial_delay: Duration::MAX,
                ..SchedulerConfig::default()
            },
        );
        delayed
            .register(
                "drive",
                flaky(Arc::new(AtomicU32::new(0)), 0, SyncError::Timeout),
                RegisterOptions::default(),
            )
            .unwrap();
        assert_eq!(
            delayed
                .schedule_auto_sync("drive", MAX_INTERVAL)
                .unwrap_err(),
            OrchestratorError::InvalidInterval("drive".to_string())
        );
        assert_eq!(delayed.scheduled_interval("drive"), None);
    }

    // Test 19: Scheduling an adapter unregistered mid-way leaves no timer
    #[tokio::test]
    async fn test_schedule_for_detached_entry_leaves_no_timer() {
        let scheduler = scheduler();
        scheduler
            .register(
                "drive",
                flaky(Arc::new(AtomicU32::new(0)), 0, SyncError::Timeout),
                RegisterOptions::default().with_interval(Duration::from_secs(60)),
            )
            .unwrap();
        assert!(scheduler.unregister("drive"));

        assert_eq!(scheduler.scheduled_interval("drive"), None);
        assert_eq!(
            scheduler
                .schedule_auto_sync("drive", Duration::from_secs(60))
                .unwrap_err(),
            OrchestratorError::UnknownAdapter("drive".to_string())
        );
        assert_eq!(scheduler.scheduled_interval("drive"), None);
    }
}
