//! Metric name and label definitions.

/// Recurring job scheduler metrics
pub mod scheduler {
    /// Jobs currently present in the registry
    pub const JOBS_REGISTERED: &str = "tickwork_scheduler_jobs_registered";
    /// Store removal notifications received, by reason
    pub const TICKS_TOTAL: &str = "tickwork_scheduler_ticks_total";
    /// Work callback invocations
    pub const INVOCATIONS_TOTAL: &str = "tickwork_scheduler_invocations_total";
    /// Work callbacks that returned an error or panicked
    pub const CALLBACK_ERRORS_TOTAL: &str = "tickwork_scheduler_callback_errors_total";
    /// Work callback duration in seconds
    pub const INVOCATION_DURATION_SECONDS: &str = "tickwork_scheduler_invocation_duration_seconds";
    /// Re-insertions into the store after a tick
    pub const REARMS_TOTAL: &str = "tickwork_scheduler_rearms_total";
    /// Recovery signals emitted after a host-initiated removal
    pub const RECOVERY_SIGNALS_TOTAL: &str = "tickwork_scheduler_recovery_signals_total";
    /// Recovery signals whose request failed
    pub const RECOVERY_FAILURES_TOTAL: &str = "tickwork_scheduler_recovery_failures_total";
}

/// Expiring store metrics
pub mod store {
    /// Entries currently held
    pub const ENTRIES: &str = "tickwork_store_entries";
    /// Entries evicted to stay under capacity
    pub const EVICTIONS_TOTAL: &str = "tickwork_store_evictions_total";
}

/// Common label keys
pub mod labels {
    pub const REASON: &str = "reason";
}
