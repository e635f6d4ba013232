//! Sync registry
//!
//! Holds the registered adapters together with their retry/interval policy
//! and run bookkeeping. Each entry guards its descriptor with its own lock,
//! which is where the `Idle -> Running` check-and-set happens.
//!
//! An entry removed by `unregister` (or replaced by a later `register`) is
//! detached: a run still holding it may finish and write to it, but nothing
//! reading the registry can observe those writes.
//!
//! The run gate belongs to the name, not the entry. A new entry registered
//! while a detached entry of the same name is still running shares its gate,
//! so at most one run per name is ever in flight.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{IntegrationError, OrchestratorError};
use crate::integrations::Integration;
use crate::models::{AdapterDescriptor, RunOutcome, RunState, SyncResult};

/// Default run-level retry budget
pub const DEFAULT_RETRY_BUDGET: u32 = 1;

/// Future returned by a sync function
pub type SyncFuture = Pin<Box<dyn Future<Output = Result<SyncResult, IntegrationError>> + Send>>;

/// Zero-argument sync operation owned by a registry entry
pub type SyncFn = Arc<dyn Fn() -> SyncFuture + Send + Sync>;

/// Wrap an async closure as a [`SyncFn`]
pub fn sync_fn<F, Fut>(f: F) -> SyncFn
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SyncResult, IntegrationError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Registration policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterOptions {
    /// Extra attempts per run (defaults to [`DEFAULT_RETRY_BUDGET`])
    pub retries: Option<u32>,
    /// Auto-sync interval; `None` means manual trigger only
    pub interval: Option<Duration>,
    /// Replace an existing entry with the same name instead of failing
    pub replace: bool,
}

impl RegisterOptions {
    /// Set the retry budget
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the auto-sync interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Allow replacing an existing entry
    pub fn replacing(mut self) -> Self {
        self.replace = true;
        self
    }
}

/// Exclusive run slot shared by every entry registered under one name
#[derive(Debug, Default)]
struct RunGate {
    busy: AtomicBool,
}

impl RunGate {
    fn acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn release(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// A registered adapter
pub struct RegistryEntry {
    seq: u64,
    name: String,
    sync_fn: SyncFn,
    integration: Option<Arc<dyn Integration>>,
    gate: Arc<RunGate>,
    descriptor: Mutex<AdapterDescriptor>,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("descriptor", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl RegistryEntry {
    fn new(
        seq: u64,
        name: String,
        sync_fn: SyncFn,
        integration: Option<Arc<dyn Integration>>,
        gate: Arc<RunGate>,
        options: &RegisterOptions,
    ) -> Self {
        let descriptor = AdapterDescriptor {
            name: name.clone(),
            retry_budget: options.retries.unwrap_or(DEFAULT_RETRY_BUDGET),
            interval_ms: options.interval.map(|i| i.as_millis() as u64),
            state: RunState::Idle,
            last_run_at: None,
            last_result: None,
            last_error: None,
            last_duration_ms: None,
            total_runs: 0,
            consecutive_failures: 0,
            skipped_ticks: 0,
            schedule_active: false,
        };

        Self {
            seq,
            name,
            sync_fn,
            integration,
            gate,
            descriptor: Mutex::new(descriptor),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdapterDescriptor> {
        self.descriptor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adapter name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sync function
    pub fn sync_fn(&self) -> SyncFn {
        self.sync_fn.clone()
    }

    /// Adapter behind this entry, if registered through `register_integration`
    pub fn integration(&self) -> Option<Arc<dyn Integration>> {
        self.integration.clone()
    }

    /// Extra attempts per run
    pub fn retry_budget(&self) -> u32 {
        self.lock().retry_budget
    }

    /// Copy of the descriptor
    pub fn snapshot(&self) -> AdapterDescriptor {
        self.lock().clone()
    }

    /// Current run state
    pub fn state(&self) -> RunState {
        self.lock().state
    }

    /// Atomically move `Idle -> Running`
    ///
    /// Returns false if a run owns this entry, or a detached entry with the
    /// same name is still running.
    pub fn try_begin(&self) -> bool {
        let mut descriptor = self.lock();
        if descriptor.state.is_busy() || !self.gate.acquire() {
            return false;
        }
        descriptor.state = RunState::Running;
        true
    }

    /// Whether any entry with this name has a run in flight
    pub fn name_busy(&self) -> bool {
        self.gate.busy.load(Ordering::SeqCst)
    }

    /// Move between `Running` and `Backoff` inside a run
    pub fn set_state(&self, state: RunState) {
        self.lock().state = state;
    }

    /// Record a tick dropped because a run was in flight
    pub fn record_skipped_tick(&self) -> u64 {
        let mut descriptor = self.lock();
        descriptor.skipped_ticks += 1;
        descriptor.skipped_ticks
    }

    /// Record an active timer with the given interval
    pub fn set_scheduled(&self, interval: Duration) {
        let mut descriptor = self.lock();
        descriptor.interval_ms = Some(interval.as_millis() as u64);
        descriptor.schedule_active = true;
    }

    /// Record that the timer was cancelled
    pub fn clear_scheduled(&self) {
        self.lock().schedule_active = false;
    }

    /// Settle a run: write its outcome and release the gate
    pub fn finish(&self, outcome: &RunOutcome, at: DateTime<Utc>) {
        let mut descriptor = self.lock();
        descriptor.state = RunState::Idle;
        self.gate.release();
        descriptor.last_run_at = Some(at);
        descriptor.last_result = Some(outcome.last_result());
        descriptor.last_duration_ms = Some(outcome.duration_ms);
        descriptor.total_runs += 1;

        if outcome.succeeded {
            descriptor.last_error = None;
            descriptor.consecutive_failures = 0;
        } else {
            descriptor.last_error = outcome.error.clone();
            descriptor.consecutive_failures += 1;
        }
    }
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    by_name: HashMap<String, Arc<RegistryEntry>>,
    gates: HashMap<String, Weak<RunGate>>,
}

/// Registry of adapters, keyed by unique name
#[derive(Default)]
pub struct SyncRegistry {
    entries: Mutex<Entries>,
}

impl SyncRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a sync function
    ///
    /// Fails with `DuplicateName` unless `options.replace` is set. Returns
    /// the replaced entry, if any, so its schedule can be cancelled.
    pub fn register(
        &self,
        name: &str,
        sync_fn: SyncFn,
        options: RegisterOptions,
    ) -> Result<Option<Arc<RegistryEntry>>, OrchestratorError> {
        self.insert(name, sync_fn, None, options)
    }

    /// Register an adapter; runs call `integration.sync(None)`
    pub fn register_integration(
        &self,
        integration: Arc<dyn Integration>,
        options: RegisterOptions,
    ) -> Result<Option<Arc<RegistryEntry>>, OrchestratorError> {
        let name = integration.name().to_string();
        let adapter = integration.clone();
        let sync = sync_fn(move || {
            let adapter = adapter.clone();
            async move { adapter.sync(None).await }
        });
        self.insert(&name, sync, Some(integration), options)
    }

    fn insert(
        &self,
        name: &str,
        sync_fn: SyncFn,
        integration: Option<Arc<dyn Integration>>,
        options: RegisterOptions,
    ) -> Result<Option<Arc<RegistryEntry>>, OrchestratorError> {
        let mut entries = self.lock();

        if entries.by_name.contains_key(name) && !options.replace {
            return Err(OrchestratorError::DuplicateName(name.to_string()));
        }

        // Detached entries of this name keep the gate alive while they run
        entries.gates.retain(|_, gate| gate.strong_count() > 0);
        let gate = entries
            .gates
            .get(name)
            .and_then(Weak::upgrade)
            .unwrap_or_default();
        entries
            .gates
            .insert(name.to_string(), Arc::downgrade(&gate));

        let seq = entries.next_seq;
        entries.next_seq += 1;
        let entry = Arc::new(RegistryEntry::new(
            seq,
            name.to_string(),
            sync_fn,
            integration,
            gate,
            &options,
        ));
        let replaced = entries.by_name.insert(name.to_string(), entry);

        if replaced.is_some() {
            info!(adapter = name, "Replaced adapter registration");
        } else {
            info!(
                adapter = name,
                retries = options.retries.unwrap_or(DEFAULT_RETRY_BUDGET),
                interval_ms = options.interval.map(|i| i.as_millis() as u64),
                "Registered adapter"
            );
        }

        Ok(replaced)
    }

    /// Remove an entry; returns it if it was present
    pub fn unregister(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        let removed = self.lock().by_name.remove(name);
        if removed.is_some() {
            info!(adapter = name, "Unregistered adapter");
        } else {
            debug!(adapter = name, "Unregister of unknown adapter ignored");
        }
        removed
    }

    /// Live entry for a name
    pub fn entry(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.lock().by_name.get(name).cloned()
    }

    /// Whether `entry` is still the registered entry for its name
    pub fn is_current(&self, entry: &Arc<RegistryEntry>) -> bool {
        self.lock()
            .by_name
            .get(entry.name())
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    /// Descriptor snapshot for a name
    pub fn get(&self, name: &str) -> Option<AdapterDescriptor> {
        self.entry(name).map(|e| e.snapshot())
    }

    /// Descriptor snapshots in registration order
    pub fn list(&self) -> Vec<AdapterDescriptor> {
        self.entries_in_order().iter().map(|e| e.snapshot()).collect()
    }

    /// Registered adapters in registration order
    pub fn integrations(&self) -> Vec<Arc<dyn Integration>> {
        self.entries_in_order()
            .iter()
            .filter_map(|e| e.integration())
            .collect()
    }

    /// Whether a name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.lock().by_name.contains_key(name)
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.lock().by_name.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entries_in_order(&self) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<_> = self.lock().by_name.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }
}
