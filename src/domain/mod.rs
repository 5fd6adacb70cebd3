use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::retention::RawRetention;

pub const SEVERE_EXCEPTION_PROBLEM: &str = "severe-jobrunr-exception";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JobStats {
    pub timestamp: Option<DateTime<Utc>>,
    pub total: i64,
    pub scheduled: i64,
    pub enqueued: i64,
    pub processing: i64,
    pub failed: i64,
    pub succeeded: i64,
    pub all_time_succeeded: i64,
    pub deleted: i64,
    pub recurring_jobs: i64,
    pub background_job_servers: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub id: Uuid,
    pub worker_pool_size: u32,
    pub poll_interval_in_seconds: u32,
    pub delete_succeeded_jobs_after: RawRetention,
    /// Only reported by servers that support automatic removal of failed jobs.
    #[serde(default)]
    pub delete_failed_jobs_after: Option<RawRetention>,
    pub permanently_delete_deleted_jobs_after: RawRetention,
    #[serde(default)]
    pub first_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub system_total_memory: Option<u64>,
    #[serde(default)]
    pub system_free_memory: Option<u64>,
    #[serde(default)]
    pub system_cpu_load: Option<f64>,
    #[serde(default)]
    pub process_max_memory: Option<u64>,
    #[serde(default)]
    pub process_free_memory: Option<u64>,
    #[serde(default)]
    pub process_allocated_memory: Option<u64>,
    #[serde(default)]
    pub process_cpu_load: Option<f64>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecurringJob {
    pub id: String,
    #[serde(default)]
    pub job_name: String,
    pub cron_expression: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub deletable_from_dashboard: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStateName {
    AwaitingExecution,
    Scheduled,
    Enqueued,
    Processing,
    Failed,
    Succeeded,
    Deleted,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobHistoryEntry {
    pub state: JobStateName,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub job_history: Vec<JobHistoryEntry>,
}

impl Job {
    /// Most recent state change; the server appends to `jobHistory`.
    pub fn last_transition(&self) -> Option<&JobHistoryEntry> {
        self.job_history.last()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub github_issue_body: Option<String>,
    #[serde(flatten)]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl Problem {
    pub fn is_severe_exception(&self) -> bool {
        self.kind == SEVERE_EXCEPTION_PROBLEM
    }
}
