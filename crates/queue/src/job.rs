//! Job types and enqueue options.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Job priority. Lower is higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Critical,
    High,
    Standard,
    Low,
}

impl JobPriority {
    pub fn value(&self) -> u8 {
        match self {
            JobPriority::Critical => 1,
            JobPriority::High => 5,
            JobPriority::Standard => 10,
            JobPriority::Low => 20,
        }
    }

    /// One step up. Critical stays Critical.
    pub fn boosted(&self) -> JobPriority {
        match self {
            JobPriority::Critical | JobPriority::High => JobPriority::Critical,
            JobPriority::Standard => JobPriority::High,
            JobPriority::Low => JobPriority::Standard,
        }
    }
}

/// A unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub priority: JobPriority,
    pub max_attempts: u32,
    pub attempts_made: u32,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base_ms: u64,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl Job {
    /// Typed view of the payload.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::QueueError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| crate::QueueError::Decode(e.to_string()))
    }
}

/// Options for [`QueueManager::add`].
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Stable id for aggressive deduplication. Auto-generated when absent.
    pub job_id: Option<String>,
    pub priority: JobPriority,
    pub attempts: u32,
    pub backoff_base_ms: u64,
    /// Initial delay before the job becomes ready.
    pub delay_ms: Option<u64>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            job_id: None,
            priority: JobPriority::Standard,
            attempts: 3,
            backoff_base_ms: 5_000,
            delay_ms: None,
        }
    }
}

impl JobOptions {
    pub fn with_job_id(mut self, id: impl Into<String>) -> Self {
        self.job_id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct JobCounts {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
}

impl JobCounts {
    /// Jobs not yet finished in any state.
    pub fn backlog(&self) -> u64 {
        self.waiting + self.delayed + self.active
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_values() {
        assert_eq!(JobPriority::Critical.value(), 1);
        assert_eq!(JobPriority::High.value(), 5);
        assert_eq!(JobPriority::Standard.value(), 10);
        assert_eq!(JobPriority::Low.value(), 20);
    }

    #[test]
    fn test_priority_boost_one_step() {
        assert_eq!(JobPriority::Low.boosted(), JobPriority::Standard);
        assert_eq!(JobPriority::Standard.boosted(), JobPriority::High);
        assert_eq!(JobPriority::High.boosted(), JobPriority::Critical);
        assert_eq!(JobPriority::Critical.boosted(), JobPriority::Critical);
    }

    #[test]
    fn test_job_serde_roundtrip() {
        let job = Job {
            id: "sync-abc".to_string(),
            queue: "sync-source".to_string(),
            name: "sync".to_string(),
            payload: serde_json::json!({"series_source_id": "x"}),
            priority: JobPriority::High,
            max_attempts: 3,
            attempts_made: 1,
            backoff_base_ms: 5_000,
            created_at: Utc::now(),
            last_error: Some("timeout".to_string()),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.priority, JobPriority::High);
        assert_eq!(back.attempts_made, 1);
    }

    #[test]
    fn test_payload_as() {
        #[derive(serde::Deserialize)]
        struct P {
            n: u32,
        }
        let job = Job {
            id: "j".into(),
            queue: "q".into(),
            name: "n".into(),
            payload: serde_json::json!({"n": 7}),
            priority: JobPriority::Standard,
            max_attempts: 1,
            attempts_made: 0,
            backoff_base_ms: 0,
            created_at: Utc::now(),
            last_error: None,
        };
        assert_eq!(job.payload_as::<P>().unwrap().n, 7);
    }
}
