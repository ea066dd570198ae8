use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::pipeline::JobStage;

pub type JobId = u64;

/// A persisted unit of deferred work.
///
/// There is no status column: a job row that still exists is pending (or
/// failed and waiting to be re-driven); a completed job is deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    /// Name of the handler that runs this job
    pub action: String,
    pub target_collection: Option<String>,
    pub target_record_id: Option<u64>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Top-level `key` of an object payload.
    pub fn payload_field(&self, key: &str) -> Option<&Value> {
        self.payload.as_ref().and_then(|payload| payload.get(key))
    }
}

/// What a job operates on, if anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobTarget {
    pub collection: Option<String>,
    pub record_id: Option<u64>,
}

impl JobTarget {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: Some(name.into()),
            record_id: None,
        }
    }

    pub fn record(collection: impl Into<String>, id: u64) -> Self {
        Self {
            collection: Some(collection.into()),
            record_id: Some(id),
        }
    }
}

/// A handler stage failed or timed out. The job row is left in place.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Job {job_id} ({action}) failed during {stage}: {message}")]
pub struct JobExecutionError {
    pub job_id: JobId,
    pub action: String,
    pub stage: JobStage,
    pub message: String,
}

/// Result of one `process_next` call.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Nothing was claimable
    Idle,
    Succeeded(JobId),
    Failed(JobId, JobExecutionError),
}

impl JobOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Idle => None,
            Self::Succeeded(id) | Self::Failed(id, _) => Some(*id),
        }
    }
}
