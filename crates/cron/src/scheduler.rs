//! Scheduler core: job registry plus the tick-driven state machine.
//!
//! There is no timer loop. Each job sits in the expiring store with a TTL
//! equal to its interval; the store's removal notification is the tick. The
//! tick runs the work callback, updates bookkeeping, and then either re-arms
//! the record, signals recovery, or retires it.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
    time::Instant,
};

use {
    chrono::Utc,
    serde_json::Value,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use tickwork_metrics::{counter, gauge, histogram, labels, scheduler as sched_metrics};

use {
    crate::{
        Result,
        lock::ExclusivityLock,
        recovery::{HttpRecovery, NoRecovery, RecoverySignal},
        record::{JobRecord, WorkFn},
        store::{ExpiringStore, OnRemoved, Priority, RemovalReason},
        types::{JobPhase, JobSnapshot, SchedulerStatus},
    },
    tickwork_config::{TickworkConfig, schema::DEFAULT_KEY_PREFIX},
};

/// Store type the scheduler runs on.
pub type JobStore = Arc<dyn ExpiringStore<Arc<JobRecord>>>;

/// Everything needed to register a job.
pub struct JobSpec {
    name: String,
    interval_secs: u64,
    max_runs: u64,
    callback: WorkFn,
    lock: Option<Box<dyn ExclusivityLock>>,
    args: Vec<Value>,
}

impl JobSpec {
    /// Unlimited runs, no lock, no arguments.
    pub fn new(
        name: impl Into<String>,
        interval_secs: u64,
        callback: impl Fn(&JobRecord, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            interval_secs,
            max_runs: 0,
            callback: Arc::new(callback),
            lock: None,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn max_runs(mut self, max_runs: u64) -> Self {
        self.max_runs = max_runs;
        self
    }

    #[must_use]
    pub fn lock(mut self, lock: impl ExclusivityLock + 'static) -> Self {
        self.lock = Some(Box::new(lock));
        self
    }

    #[must_use]
    pub fn boxed_lock(mut self, lock: Option<Box<dyn ExclusivityLock>>) -> Self {
        self.lock = lock;
        self
    }

    #[must_use]
    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }
}

struct Inner {
    store: JobStore,
    /// Serializes `run` and `stop` so a registration never lands between a
    /// stop's registry removal and its store removal.
    lifecycle: Mutex<()>,
    registry: RwLock<HashMap<String, Arc<JobRecord>>>,
    recovery: Arc<dyn RecoverySignal>,
    key_prefix: String,
}

/// The recurring job scheduler. Cheap to clone; clones share one registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Scheduler with the default key prefix and no recovery endpoint.
    pub fn new(store: JobStore) -> Self {
        Self::with_recovery(store, Arc::new(NoRecovery), DEFAULT_KEY_PREFIX)
    }

    pub fn with_recovery(
        store: JobStore,
        recovery: Arc<dyn RecoverySignal>,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                lifecycle: Mutex::new(()),
                registry: RwLock::new(HashMap::new()),
                recovery,
                key_prefix: key_prefix.into(),
            }),
        }
    }

    /// Build from loaded configuration. Must be called inside a tokio runtime
    /// when a recovery URL is configured.
    pub fn from_config(store: JobStore, config: &TickworkConfig) -> Result<Self> {
        let recovery: Arc<dyn RecoverySignal> = match HttpRecovery::from_config(&config.recovery)? {
            Some(http) => {
                info!(url = %http.url(), "recovery signal enabled");
                Arc::new(http)
            },
            None => Arc::new(NoRecovery),
        };
        Ok(Self::with_recovery(
            store,
            recovery,
            config.scheduler.key_prefix.clone(),
        ))
    }

    /// Store key for a job name.
    pub fn key_for(&self, name: &str) -> String {
        self.inner.key_for(name)
    }

    /// Register and arm a job unless a live one with the same name exists.
    ///
    /// Registering a live name changes nothing about the existing job. A
    /// finished record still waiting for its last tick is replaced.
    /// Returns `true` when a new job was armed. Failures are logged, never
    /// returned.
    pub fn run(
        &self,
        name: impl Into<String>,
        interval_secs: u64,
        max_runs: u64,
        callback: impl Fn(&JobRecord, &[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
        lock: Option<Box<dyn ExclusivityLock>>,
        args: Vec<Value>,
    ) -> bool {
        self.run_spec(
            JobSpec::new(name, interval_secs, callback)
                .max_runs(max_runs)
                .boxed_lock(lock)
                .args(args),
        )
    }

    /// [`Scheduler::run`] taking a [`JobSpec`].
    pub fn run_spec(&self, spec: JobSpec) -> bool {
        let JobSpec {
            name,
            interval_secs,
            max_runs,
            callback,
            lock,
            args,
        } = spec;

        if interval_secs == 0 {
            warn!(job = %name, "refusing to schedule job with a zero interval");
            if let Some(lock) = lock {
                lock.detach();
            }
            return false;
        }

        let _lifecycle = self.inner.lifecycle();
        let key = self.inner.key_for(&name);
        let (record, replaced) = {
            let mut registry = self.inner.registry_mut();
            if registry.get(&name).is_some_and(|existing| existing.is_alive()) {
                debug!(job = %name, "job already registered, ignoring");
                drop(registry);
                if let Some(lock) = lock {
                    lock.detach();
                }
                return false;
            }
            let record = Arc::new(JobRecord::new(
                name.clone(),
                key,
                interval_secs,
                max_runs,
                callback,
                lock,
                args,
            ));
            let replaced = registry.insert(name, Arc::clone(&record));
            #[cfg(feature = "metrics")]
            gauge!(sched_metrics::JOBS_REGISTERED).set(registry.len() as f64);
            (record, replaced)
        };

        // A finished record still waiting for its last tick. Arming the new
        // record overwrites its store entry, so that tick never arrives.
        if let Some(previous) = replaced {
            debug!(job = %previous.name(), "replacing finished job");
            previous.release_lock();
            previous.settle_stopped();
        }

        match self.inner.arm(&record) {
            Ok(true) => {
                info!(
                    job = %record.name(),
                    interval_secs,
                    max_runs,
                    "job armed"
                );
                true
            },
            Ok(false) => {
                // Stopped between registration and arming.
                self.inner.retire(&record);
                false
            },
            Err(e) => {
                warn!(job = %record.name(), error = %e, "failed to arm job, it will not run");
                self.inner.retire(&record);
                false
            },
        }
    }

    /// Stop a job: no invocation starts after this returns. An invocation
    /// already running completes. Safe to call repeatedly.
    pub fn stop(&self, name: &str) {
        let _lifecycle = self.inner.lifecycle();
        let record = self.inner.registry_mut().remove(name);
        #[cfg(feature = "metrics")]
        gauge!(sched_metrics::JOBS_REGISTERED).set(self.inner.registry().len() as f64);

        if let Some(record) = &record {
            record.finish();
        }

        // Attempted even when nothing is registered; the notification this
        // triggers finds the record dead and retires it. An entry holding a
        // different record is left alone.
        let key = self.inner.key_for(name);
        let removed = match &record {
            Some(record) => {
                let holds_record = self
                    .inner
                    .store
                    .lookup(&key)
                    .is_some_and(|current| Arc::ptr_eq(&current, record));
                if holds_record {
                    self.inner.store.remove(&key)
                } else {
                    None
                }
            },
            None => self.inner.store.remove(&key),
        };

        if let Some(record) = record {
            record.release_lock();
            record.settle_stopped();
            info!(job = name, runs = record.runs_so_far(), "job stopped");
        } else if removed.is_some() {
            debug!(job = name, "removed unregistered store entry");
        }
    }

    /// Stop every registered job.
    pub fn stop_all(&self) {
        for name in self.job_names() {
            self.stop(&name);
        }
    }

    /// Mark a job dead without removing its store entry. The pending tick
    /// still arrives but runs nothing, and the job stops there.
    ///
    /// Returns `false` when no job is registered under `name`.
    pub fn set_final_run(&self, name: &str) -> bool {
        let record = self.inner.registry().get(name).cloned();
        match record {
            Some(record) => {
                record.finish();
                info!(job = name, "job will stop at its next tick");
                true
            },
            None => false,
        }
    }

    /// Whether a live job is registered under `name`. A job marked by
    /// [`Scheduler::set_final_run`] no longer counts.
    pub fn contains(&self, name: &str) -> bool {
        self.inner
            .registry()
            .get(name)
            .is_some_and(|record| record.is_alive())
    }

    pub fn snapshot(&self, name: &str) -> Option<JobSnapshot> {
        self.inner.registry().get(name).map(|r| r.snapshot())
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.registry().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self) -> SchedulerStatus {
        let registry = self.inner.registry();
        let mut status = SchedulerStatus {
            job_count: registry.len(),
            ..Default::default()
        };
        for record in registry.values() {
            match record.phase() {
                JobPhase::Armed => status.armed_count += 1,
                JobPhase::Invoking => status.invoking_count += 1,
                JobPhase::Stopped => {},
            }
            status.total_runs += record.runs_so_far();
        }
        status
    }
}

impl Inner {
    fn key_for(&self, name: &str) -> String {
        format!("{}{name}", self.key_prefix)
    }

    fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn registry(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<JobRecord>>> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobRecord>>> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert the record with a TTL of its current interval. Returns
    /// `Ok(false)` without inserting when the record is already dead.
    fn arm(self: &Arc<Self>, record: &Arc<JobRecord>) -> Result<bool> {
        let _arming = record.arming_guard();
        if !record.is_alive() {
            return Ok(false);
        }
        record.set_phase(JobPhase::Armed);

        let weak: Weak<Inner> = Arc::downgrade(self);
        let on_removed: OnRemoved<Arc<JobRecord>> = Arc::new(
            move |key: &str, record: Arc<JobRecord>, reason: RemovalReason| match weak.upgrade() {
                Some(inner) => inner.on_tick(key, &record, reason),
                // Scheduler dropped; nothing will ever re-arm this record.
                None => {
                    record.finish();
                    record.release_lock();
                    record.set_phase(JobPhase::Stopped);
                },
            },
        );

        self.store.insert(
            record.key(),
            Arc::clone(record),
            record.ttl(),
            Priority::NotRemovable,
            on_removed,
        )?;
        Ok(true)
    }

    /// Store removal notification for one record.
    fn on_tick(self: &Arc<Self>, key: &str, record: &Arc<JobRecord>, reason: RemovalReason) {
        debug!(job = %record.name(), key, %reason, "tick");
        #[cfg(feature = "metrics")]
        counter!(sched_metrics::TICKS_TOTAL, labels::REASON => reason.as_str()).increment(1);

        if !record.is_alive() {
            debug!(job = %record.name(), "tick for finished job");
            self.retire(record);
            return;
        }

        self.invoke(record);

        match reason {
            RemovalReason::ExplicitlyRemoved => {
                // The scheduler only removes records it has already marked
                // dead, so this came from the host and the store may be gone.
                warn!(
                    job = %record.name(),
                    "job removed by host, signalling recovery instead of re-arming"
                );
                self.recovery.signal(record.name());
                self.retire(record);
            },
            RemovalReason::Expired | RemovalReason::EvictedForCapacity => {
                if !record.should_continue() {
                    info!(
                        job = %record.name(),
                        runs = record.runs_so_far(),
                        "job finished"
                    );
                    self.retire(record);
                    return;
                }
                match self.arm(record) {
                    Ok(true) => {
                        #[cfg(feature = "metrics")]
                        counter!(sched_metrics::REARMS_TOTAL).increment(1);
                        debug!(
                            job = %record.name(),
                            interval_secs = record.interval_secs(),
                            "job re-armed"
                        );
                    },
                    Ok(false) => self.retire(record),
                    Err(e) => {
                        warn!(job = %record.name(), error = %e, "failed to re-arm job");
                        self.retire(record);
                    },
                }
            },
        }
    }

    /// Run the work callback and update bookkeeping whatever its outcome.
    fn invoke(&self, record: &Arc<JobRecord>) {
        let args = record.begin_invocation();
        let callback = record.callback();
        let started = Instant::now();

        let outcome = catch_unwind(AssertUnwindSafe(|| callback(record, &args)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{e:#}")),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        #[cfg(feature = "metrics")]
        {
            counter!(sched_metrics::INVOCATIONS_TOTAL).increment(1);
            histogram!(sched_metrics::INVOCATION_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
            if failure.is_some() {
                counter!(sched_metrics::CALLBACK_ERRORS_TOTAL).increment(1);
            }
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(message) = &failure {
            error!(job = %record.name(), error = %message, elapsed_ms, "job callback failed");
        }
        let runs = record.complete_invocation(Utc::now(), failure);
        debug!(job = %record.name(), runs, elapsed_ms, "job invoked");
    }

    /// Terminal transition: release the lock and drop the registry entry if
    /// it still belongs to this record.
    fn retire(&self, record: &Arc<JobRecord>) {
        record.set_phase(JobPhase::Stopped);
        record.release_lock();

        let mut registry = self.registry_mut();
        if registry
            .get(record.name())
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            registry.remove(record.name());
        }
        #[cfg(feature = "metrics")]
        gauge!(sched_metrics::JOBS_REGISTERED).set(registry.len() as f64);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
