use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PRIORITY: u8 = 5;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// `now + delay` in epoch milliseconds, pinned at `u64::MAX`.
pub(crate) fn millis_after(now: u64, delay: Duration) -> u64 {
    now.saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A queued unit of work. All timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    /// 1..=10, higher runs first among jobs due at the same time
    pub priority: u8,
    pub created_at: u64,
    pub attempts: u32,
    pub max_retries: u32,
    pub scheduled_for: u64,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<u64>,
}

impl Job {
    /// Position in the pending set. The priority offset orders jobs due at
    /// the same millisecond without moving them past later schedules by
    /// more than 9ms.
    pub fn score(&self) -> f64 {
        self.scheduled_for as f64 + (10 - self.priority.min(10)) as f64
    }

    /// Delay before the next attempt after a failure: `2^attempts` seconds.
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(2u64.saturating_pow(self.attempts))
    }

    /// When the next attempt may run after a failure at `now`.
    pub fn retry_at(&self, now: u64) -> u64 {
        millis_after(now, self.backoff())
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub priority: u8,
    pub max_retries: u32,
    /// Run no earlier than now + delay
    pub delay: Option<Duration>,
    /// Run no earlier than this epoch millisecond; wins over `delay`
    pub scheduled_for: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: DEFAULT_PRIORITY,
            max_retries: DEFAULT_MAX_RETRIES,
            delay: None,
            scheduled_for: None,
        }
    }
}

impl JobOptions {
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn scheduled_for(mut self, at_millis: u64) -> Self {
        self.scheduled_for = Some(at_millis);
        self
    }

    pub(crate) fn resolve_schedule(&self, now: u64) -> u64 {
        match (self.scheduled_for, self.delay) {
            (Some(at), _) => at,
            (None, Some(delay)) => millis_after(now, delay),
            (None, None) => now,
        }
    }
}

/// What `fail` did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
    Retrying { scheduled_for: u64 },
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(priority: u8, scheduled_for: u64) -> Job {
        Job {
            id: "j".into(),
            job_type: "email".into(),
            payload: serde_json::json!({}),
            priority,
            created_at: 0,
            attempts: 0,
            max_retries: 3,
            scheduled_for,
            status: JobStatus::Pending,
            last_error: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    #[test]
    fn test_higher_priority_scores_lower() {
        assert!(job(10, 1_000).score() < job(1, 1_000).score());
        assert_eq!(job(10, 1_000).score(), 1_000.0);
        assert_eq!(job(1, 1_000).score(), 1_009.0);
    }

    #[test]
    fn test_backoff_doubles() {
        let mut j = job(5, 0);
        j.attempts = 1;
        assert_eq!(j.backoff(), Duration::from_secs(2));
        j.attempts = 3;
        assert_eq!(j.backoff(), Duration::from_secs(8));
    }

    #[test]
    fn test_schedule_resolution() {
        assert_eq!(JobOptions::default().resolve_schedule(100), 100);
        assert_eq!(
            JobOptions::default()
                .delay(Duration::from_secs(2))
                .resolve_schedule(100),
            2_100
        );
        assert_eq!(
            JobOptions::default()
                .delay(Duration::from_secs(2))
                .scheduled_for(50)
                .resolve_schedule(100),
            50
        );
    }

    #[test]
    fn test_far_schedules_saturate() {
        let options = JobOptions::default().delay(Duration::from_secs(u64::MAX));
        assert_eq!(options.resolve_schedule(1_700_000_000_000), u64::MAX);

        let mut j = job(5, 0);
        j.attempts = 200;
        assert_eq!(j.retry_at(1_700_000_000_000), u64::MAX);
        j.attempts = 2;
        assert_eq!(j.retry_at(1_000), 5_000);
    }

    #[test]
    fn test_terminal_statuses() {
        let mut j = job(5, 0);
        assert!(!j.is_terminal());
        j.status = JobStatus::Processing;
        assert!(!j.is_terminal());
        for status in [JobStatus::Completed, JobStatus::Failed] {
            j.status = status;
            assert!(j.is_terminal());
        }
    }

    #[test]
    fn test_status_display_matches_wire_name() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
    }

    #[test]
    fn test_job_serializes_type_field() {
        let json = serde_json::to_value(job(5, 0)).unwrap();
        assert_eq!(json["type"], "email");
        assert_eq!(json["status"], "pending");
        assert!(json.get("last_error").is_none());
    }
}
