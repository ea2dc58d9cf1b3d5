//! Serializable views of scheduler state.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Where a job record sits in its lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum JobPhase {
    /// In the store, waiting for its entry to expire.
    #[default]
    Armed,
    /// Work callback running.
    Invoking,
    /// Terminal. Not in the store, lock released.
    Stopped,
}

/// Point-in-time copy of a job record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub name: String,
    pub key: String,
    pub alive: bool,
    pub phase: JobPhase,
    pub interval_secs: u64,
    pub max_runs: u64,
    pub runs_so_far: u64,
    pub args: Vec<serde_json::Value>,
    pub has_lock: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Summary of the registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub job_count: usize,
    pub armed_count: usize,
    pub invoking_count: usize,
    pub total_runs: u64,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_defaults_to_armed() {
        assert_eq!(JobPhase::default(), JobPhase::Armed);
        assert_eq!(serde_json::to_string(&JobPhase::Invoking).unwrap(), "\"invoking\"");
    }

    #[test]
    fn snapshot_serializes_camel_case_and_skips_empty_fields() {
        let snap = JobSnapshot {
            name: "digest".into(),
            key: "tickwork:job:digest".into(),
            alive: true,
            phase: JobPhase::Armed,
            interval_secs: 60,
            max_runs: 0,
            runs_so_far: 3,
            args: vec![serde_json::json!("weekly")],
            has_lock: false,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            last_run_at: None,
            last_error: None,
        };
        let v = serde_json::to_value(&snap).unwrap();
        assert_eq!(v["intervalSecs"], 60);
        assert_eq!(v["runsSoFar"], 3);
        assert_eq!(v["phase"], "armed");
        assert!(v.get("lastRunAt").is_none());
        assert!(v.get("lastError").is_none());
    }

    #[test]
    fn status_serialize() {
        let s = SchedulerStatus {
            job_count: 2,
            armed_count: 1,
            invoking_count: 1,
            total_runs: 9,
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["jobCount"], 2);
        assert_eq!(v["totalRuns"], 9);
    }
}
