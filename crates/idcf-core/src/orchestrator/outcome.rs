//! Per-task outcome types.

use serde::{Deserialize, Serialize};

/// Status of one series task.
///
/// `Partial` records a transfer that moved bytes but did not finish. Only
/// `Completed` and `Skipped` are settled: a resumed run re-attempts failed
/// and partial tasks rather than carrying their old status forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    Skipped,
    Partial,
}

impl TaskStatus {
    /// True when a resumed run has nothing left to do for the task.
    pub fn is_settled(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Partial => "partial",
        }
    }
}

/// Result of one series task within a run. One per task, written once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub series_id: String,
    pub status: TaskStatus,
    pub bytes_transferred: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DownloadOutcome {
    pub fn skipped(series_id: &str) -> Self {
        Self {
            series_id: series_id.to_string(),
            status: TaskStatus::Skipped,
            bytes_transferred: 0,
            attempts: 0,
            error_detail: None,
        }
    }
}
