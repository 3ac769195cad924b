use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase reported on a job's progress stream. Finer-grained than
/// [`crate::jobs::JobState`]: the Running state is split into the three
/// activities a subscriber actually sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    /// Accepted and waiting for the generation slot.
    Queued,
    /// Fetching the template and font.
    Loading,
    /// Rendering row batches.
    Rendering,
    /// Finalizing the archive.
    Archiving,
    /// All rows attempted, archive ready.
    Completed,
    /// Stopped early but an archive with the finished rows is ready.
    Partial,
    /// Stopped before any row was attempted; no archive.
    Cancelled,
    /// Nothing usable was produced.
    Failed,
}

impl ProgressStage {
    /// A terminal stage never transitions again and closes progress streams.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStage::Completed
                | ProgressStage::Partial
                | ProgressStage::Cancelled
                | ProgressStage::Failed
        )
    }
}

/// One progress report, pushed to every subscriber of a job's stream.
///
/// `current` counts every attempted row, success or failure, so the bar always
/// reaches `total` on a job that ran to the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub stage: ProgressStage,
    pub current: usize,
    pub total: usize,
    pub percent: u8,
    /// Human-readable note: the current activity, or the reason on a terminal
    /// stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(job_id: &str, stage: ProgressStage, current: usize, total: usize) -> Self {
        let percent = if total == 0 {
            0
        } else {
            (current * 100 / total).min(100) as u8
        };
        Self {
            job_id: job_id.to_string(),
            stage,
            current,
            total,
            percent,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages() {
        assert!(!ProgressStage::Queued.is_terminal());
        assert!(!ProgressStage::Loading.is_terminal());
        assert!(!ProgressStage::Rendering.is_terminal());
        assert!(!ProgressStage::Archiving.is_terminal());
        assert!(ProgressStage::Completed.is_terminal());
        assert!(ProgressStage::Partial.is_terminal());
        assert!(ProgressStage::Cancelled.is_terminal());
        assert!(ProgressStage::Failed.is_terminal());
    }

    #[test]
    fn percent_is_derived_and_clamped() {
        assert_eq!(ProgressEvent::new("a", ProgressStage::Rendering, 5, 20).percent, 25);
        assert_eq!(ProgressEvent::new("a", ProgressStage::Rendering, 0, 0).percent, 0);
        assert_eq!(ProgressEvent::new("a", ProgressStage::Completed, 20, 20).percent, 100);
    }

    #[test]
    fn stage_serializes_snake_case() {
        let event = ProgressEvent::new("abc", ProgressStage::Partial, 10, 10);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""stage":"partial""#));
        assert!(!json.contains("message"));
    }
}
