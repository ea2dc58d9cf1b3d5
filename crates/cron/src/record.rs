//! Job records: the schedulable state of one named recurring job.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    serde_json::Value,
    tracing::debug,
};

use crate::{
    lock::ExclusivityLock,
    types::{JobPhase, JobSnapshot},
};

/// Work callback. Receives the record (to read or adjust its settings) and
/// the current argument list.
pub type WorkFn = Arc<dyn Fn(&JobRecord, &[Value]) -> anyhow::Result<()> + Send + Sync>;

struct RecordState {
    args: Vec<Value>,
    interval_secs: u64,
    max_runs: u64,
    runs_so_far: u64,
    last_run_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    phase: JobPhase,
    lock: Option<Box<dyn ExclusivityLock>>,
}

/// One registered job.
///
/// Settings the work callback may change (`args`, interval, `max_runs`, the
/// lock) sit behind a per-record mutex. The mutex is never held while the
/// callback runs, so the callback can call any setter.
pub struct JobRecord {
    name: String,
    key: String,
    callback: WorkFn,
    alive: AtomicBool,
    created_at: DateTime<Utc>,
    state: Mutex<RecordState>,
    /// Serializes "check alive, then insert into the store" against `finish`.
    arming: Mutex<()>,
}

impl fmt::Debug for JobRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRecord")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl JobRecord {
    pub(crate) fn new(
        name: String,
        key: String,
        interval_secs: u64,
        max_runs: u64,
        callback: WorkFn,
        lock: Option<Box<dyn ExclusivityLock>>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            name,
            key,
            callback,
            alive: AtomicBool::new(true),
            created_at: Utc::now(),
            state: Mutex::new(RecordState {
                args,
                interval_secs: interval_secs.max(1),
                max_runs,
                runs_so_far: 0,
                last_run_at: None,
                last_error: None,
                phase: JobPhase::Armed,
                lock,
            }),
            arming: Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key this record is inserted under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Mark the record so it is never invoked or re-armed again.
    ///
    /// Waits for an in-progress re-arm to finish so that, once this returns,
    /// no later insertion of this record can happen.
    pub fn finish(&self) {
        let _arming = self.arming.lock().unwrap_or_else(|e| e.into_inner());
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!(job = %self.name, "job marked finished");
        }
    }

    pub fn interval_secs(&self) -> u64 {
        self.state().interval_secs
    }

    /// Change the delay before the next tick. Takes effect at the next re-arm.
    /// Zero is raised to one second.
    pub fn set_interval_secs(&self, secs: u64) {
        self.state().interval_secs = secs.max(1);
    }

    /// `0` means unlimited.
    pub fn max_runs(&self) -> u64 {
        self.state().max_runs
    }

    pub fn set_max_runs(&self, max_runs: u64) {
        self.state().max_runs = max_runs;
    }

    pub fn runs_so_far(&self) -> u64 {
        self.state().runs_so_far
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.state().last_run_at
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn args(&self) -> Vec<Value> {
        self.state().args.clone()
    }

    /// Replace the arguments passed to future invocations.
    pub fn set_args(&self, args: Vec<Value>) {
        self.state().args = args;
    }

    pub fn phase(&self) -> JobPhase {
        self.state().phase
    }

    pub fn has_lock(&self) -> bool {
        self.state().lock.is_some()
    }

    /// Run `f` against the current lock handle, if any.
    pub fn with_lock<R>(&self, f: impl FnOnce(Option<&dyn ExclusivityLock>) -> R) -> R {
        let state = self.state();
        f(state.lock.as_deref())
    }

    /// Swap in a new lock handle. The previous handle, if any, is detached.
    pub fn replace_lock(&self, lock: Option<Box<dyn ExclusivityLock>>) {
        let previous = std::mem::replace(&mut self.state().lock, lock);
        if let Some(previous) = previous {
            debug!(job = %self.name, kind = previous.kind(), "replaced lock detached");
            previous.detach();
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.state();
        JobSnapshot {
            name: self.name.clone(),
            key: self.key.clone(),
            alive: self.is_alive(),
            phase: state.phase,
            interval_secs: state.interval_secs,
            max_runs: state.max_runs,
            runs_so_far: state.runs_so_far,
            args: state.args.clone(),
            has_lock: state.lock.is_some(),
            created_at: self.created_at,
            last_run_at: state.last_run_at,
            last_error: state.last_error.clone(),
        }
    }

    // ── Scheduler-owned transitions ─────────────────────────────────────

    pub(crate) fn callback(&self) -> WorkFn {
        Arc::clone(&self.callback)
    }

    pub(crate) fn arming_guard(&self) -> MutexGuard<'_, ()> {
        self.arming.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn ttl(&self) -> Duration {
        Duration::from_secs(self.interval_secs())
    }

    pub(crate) fn set_phase(&self, phase: JobPhase) {
        self.state().phase = phase;
    }

    /// Enter `Invoking` and hand back the arguments for this invocation.
    pub(crate) fn begin_invocation(&self) -> Vec<Value> {
        let mut state = self.state();
        state.phase = JobPhase::Invoking;
        state.args.clone()
    }

    /// Record a finished invocation, successful or not. Returns the new run
    /// count.
    pub(crate) fn complete_invocation(&self, at: DateTime<Utc>, error: Option<String>) -> u64 {
        let mut state = self.state();
        state.last_run_at = Some(at);
        state.runs_so_far += 1;
        state.last_error = error;
        state.runs_so_far
    }

    /// Continue while alive and under the run limit.
    pub(crate) fn should_continue(&self) -> bool {
        if !self.is_alive() {
            return false;
        }
        let state = self.state();
        state.max_runs == 0 || state.runs_so_far < state.max_runs
    }

    /// Move to `Stopped` unless an invocation is still in flight; the tick
    /// path settles that case itself once the callback returns.
    pub(crate) fn settle_stopped(&self) {
        let mut state = self.state();
        if state.phase != JobPhase::Invoking {
            state.phase = JobPhase::Stopped;
        }
    }

    /// Detach and drop the lock handle. Returns `false` when none was held.
    pub(crate) fn release_lock(&self) -> bool {
        let lock = self.state().lock.take();
        match lock {
            Some(lock) => {
                debug!(job = %self.name, kind = lock.kind(), "lock detached");
                lock.detach();
                true
            },
            None => false,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use {super::*, serde_json::json};

    #[derive(Debug, Default)]
    struct CountingLock {
        detached: Arc<AtomicUsize>,
    }

    impl ExclusivityLock for CountingLock {
        fn detach(&self) {
            self.detached.fetch_add(1, Ordering::SeqCst);
        }

        fn kind(&self) -> &'static str {
            "counting"
        }
    }

    fn noop() -> WorkFn {
        Arc::new(|_, _| Ok(()))
    }

    fn record(max_runs: u64, lock: Option<Box<dyn ExclusivityLock>>) -> JobRecord {
        JobRecord::new(
            "job".into(),
            "tickwork:job:job".into(),
            30,
            max_runs,
            noop(),
            lock,
            vec![json!(1)],
        )
    }

    #[test]
    fn new_record_is_alive_and_armed() {
        let r = record(0, None);
        assert!(r.is_alive());
        assert_eq!(r.phase(), JobPhase::Armed);
        assert_eq!(r.runs_so_far(), 0);
        assert!(r.last_run_at().is_none());
        assert_eq!(r.ttl(), Duration::from_secs(30));
    }

    #[test]
    fn continuation_respects_max_runs() {
        let r = record(2, None);
        assert!(r.should_continue());
        r.complete_invocation(Utc::now(), None);
        assert!(r.should_continue());
        r.complete_invocation(Utc::now(), None);
        assert!(!r.should_continue());
    }

    #[test]
    fn unlimited_runs_continue_until_finished() {
        let r = record(0, None);
        for _ in 0..100 {
            r.complete_invocation(Utc::now(), None);
        }
        assert!(r.should_continue());
        r.finish();
        assert!(!r.should_continue());
    }

    #[test]
    fn zero_interval_is_clamped() {
        let r = record(0, None);
        r.set_interval_secs(0);
        assert_eq!(r.interval_secs(), 1);
    }

    #[test]
    fn release_lock_detaches_once() {
        let detached = Arc::new(AtomicUsize::new(0));
        let r = record(
            0,
            Some(Box::new(CountingLock {
                detached: Arc::clone(&detached),
            })),
        );
        assert!(r.has_lock());
        assert!(r.release_lock());
        assert!(!r.release_lock());
        assert_eq!(detached.load(Ordering::SeqCst), 1);
        assert!(!r.has_lock());
    }

    #[test]
    fn replace_lock_detaches_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let r = record(
            0,
            Some(Box::new(CountingLock {
                detached: Arc::clone(&first),
            })),
        );
        r.replace_lock(Some(Box::new(CountingLock {
            detached: Arc::clone(&second),
        })));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(r.with_lock(|l| l.map(|l| l.kind())), Some("counting"));
    }

    #[test]
    fn settle_stopped_leaves_invoking_alone() {
        let r = record(0, None);
        r.begin_invocation();
        r.settle_stopped();
        assert_eq!(r.phase(), JobPhase::Invoking);
        r.set_phase(JobPhase::Armed);
        r.settle_stopped();
        assert_eq!(r.phase(), JobPhase::Stopped);
    }

    #[test]
    fn complete_invocation_records_error_and_time() {
        let r = record(0, None);
        let at = Utc::now();
        assert_eq!(r.complete_invocation(at, Some("boom".into())), 1);
        assert_eq!(r.last_run_at(), Some(at));
        assert_eq!(r.last_error().as_deref(), Some("boom"));
        r.complete_invocation(at, None);
        assert!(r.last_error().is_none());
    }

    #[test]
    fn snapshot_reflects_mutations() {
        let r = record(5, None);
        r.set_args(vec![json!("a"), json!("b")]);
        r.set_max_runs(7);
        let snap = r.snapshot();
        assert_eq!(snap.args, vec![json!("a"), json!("b")]);
        assert_eq!(snap.max_runs, 7);
        assert!(!snap.has_lock);
        assert!(snap.alive);
    }
}
