//! `JobRecord`: persisted in `<graphName>_jobs.jobs` (§3, §4.8).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Import,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    NotStarted,
    Running,
    Cancelling,
    Cancelled,
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded
                | JobStatus::PartiallySucceeded
                | JobStatus::Failed
                | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub purge_at: DateTime<Utc>,
    pub request_data: Value,
    pub result_data: Option<Value>,
    pub error_data: Option<Value>,
    pub checkpoint_data: Option<Value>,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub lock_acquired_by: Option<String>,
    pub lock_lease_duration: ChronoDuration,
    pub lock_heartbeat_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub const DEFAULT_LEASE_MINUTES: i64 = 5;
    /// Jobs are purged this long after creation unless re-scheduled.
    pub const DEFAULT_PURGE_DAYS: i64 = 30;

    pub fn new(id: impl Into<String>, job_type: JobType, request_data: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            job_type,
            status: JobStatus::NotStarted,
            created_at: now,
            updated_at: now,
            finished_at: None,
            purge_at: now + ChronoDuration::days(Self::DEFAULT_PURGE_DAYS),
            request_data,
            result_data: None,
            error_data: None,
            checkpoint_data: None,
            lock_acquired_at: None,
            lock_acquired_by: None,
            lock_lease_duration: ChronoDuration::minutes(Self::DEFAULT_LEASE_MINUTES),
            lock_heartbeat_at: None,
        }
    }

    /// §8 item 6: exclusivity — this job's lock is currently held and not
    /// expired.
    pub fn lease_is_active(&self, now: DateTime<Utc>) -> bool {
        match (self.lock_acquired_by.as_ref(), self.lock_acquired_at) {
            (Some(_), Some(acquired_at)) => acquired_at + self.lock_lease_duration > now,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_starts_unlocked_and_not_started() {
        let job = JobRecord::new("job-1", JobType::Import, json!({}));
        assert_eq!(job.status, JobStatus::NotStarted);
        assert!(!job.lease_is_active(Utc::now()));
    }

    #[test]
    fn lease_is_active_only_within_duration() {
        let mut job = JobRecord::new("job-1", JobType::Import, json!({}));
        job.lock_acquired_by = Some("host-1-pid-abcd1234".to_string());
        job.lock_acquired_at = Some(Utc::now() - ChronoDuration::minutes(10));
        job.lock_lease_duration = ChronoDuration::minutes(5);
        assert!(!job.lease_is_active(Utc::now()));

        job.lock_acquired_at = Some(Utc::now());
        assert!(job.lease_is_active(Utc::now()));
    }

    #[test]
    fn terminal_statuses_are_distinguished_from_in_progress() {
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::PartiallySucceeded.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Cancelling.is_terminal());
    }
}
