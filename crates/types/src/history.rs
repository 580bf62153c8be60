//! Persisted record of a finished workflow run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall disposition of a workflow run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    Canceled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// History entry appended once per finished workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowHistoryEntry {
    /// When the run started.
    pub executed_at: DateTime<Utc>,
    /// Environment the run used.
    pub environment: String,
    /// Stable identifier of the workflow (document path plus workflow name).
    pub workflow_id: String,
    pub workflow_name: String,
    pub outcome: RunOutcome,
    /// One-line summary.
    pub summary: String,
    pub duration_ms: u64,
    /// Full textual report.
    pub report: String,
    /// Reconstructed directive-comment definition for replay and audit.
    pub definition: String,
}
