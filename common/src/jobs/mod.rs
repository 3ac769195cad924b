use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::progress::ProgressStage;

/// Lifecycle state of a generation job as exposed by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Partial,
    Cancelled,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Partial | JobState::Cancelled | JobState::Failed
        )
    }
}

impl From<ProgressStage> for JobState {
    fn from(stage: ProgressStage) -> Self {
        match stage {
            ProgressStage::Queued => JobState::Queued,
            ProgressStage::Loading | ProgressStage::Rendering | ProgressStage::Archiving => {
                JobState::Running
            }
            ProgressStage::Completed => JobState::Completed,
            ProgressStage::Partial => JobState::Partial,
            ProgressStage::Cancelled => JobState::Cancelled,
            ProgressStage::Failed => JobState::Failed,
        }
    }
}

/// What the finished archive looks like, reported once a job reaches
/// `Completed` or `Partial`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Number of documents inside the archive.
    pub entries: usize,
    /// Archive size on disk in bytes.
    pub bytes: u64,
    /// When the archive is deleted and the download link stops working.
    pub expires_at: DateTime<Utc>,
}

/// Point-in-time view of a job, served by the status endpoint and sent as the
/// first event of every progress stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub state: JobState,
    /// Rows attempted so far, successes and failures both.
    pub processed: usize,
    /// Rows whose render failed and were left out of the archive.
    pub failed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactInfo>,
    pub created_at: DateTime<Utc>,
    /// Set when the job reaches a terminal state; drives retention sweeps
    /// for jobs that produced no archive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobSnapshot {
    pub fn queued(job_id: &str, total: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: JobState::Queued,
            processed: 0,
            failed: 0,
            total,
            message: None,
            artifact: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}
