//! Mutable state of an in-progress workflow run.
//!
//! A [`RunState`] is created when a run starts and consumed by the finalizer.
//! It is owned by exactly one [`WorkflowSession`](crate::WorkflowSession); the
//! single `current` slot makes "one request in flight" an explicit field.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use reqterm_types::{OnFailurePolicy, ResponseSnapshot, TestResult, WorkflowDefinition};

use crate::executor::DispatchToken;

/// How a run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOrigin {
    /// A named workflow from the document. Recorded in history.
    Workflow,
    /// An ad-hoc loop over a single request's own for-each spec. Never recorded,
    /// and the loop variable stays out of workflow scope.
    ForEachRequest,
}

/// Terminal disposition of one step result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Canceled,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Canceled => "canceled",
        }
    }

    /// Fixed-width marker used in reports.
    pub fn marker(self) -> &'static str {
        match self {
            Self::Succeeded => "[ok]  ",
            Self::Failed => "[FAIL]",
            Self::Skipped => "[skip]",
            Self::Canceled => "[stop]",
        }
    }
}

/// Outcome of one attempted step, or one loop iteration of it.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// 0-based index of the static step.
    pub step_index: usize,
    pub label: String,
    /// Request that was (or would have been) executed.
    pub request_name: Option<String>,
    pub status: StepStatus,
    /// Response status line, or a short reason when nothing was sent.
    pub status_text: String,
    pub duration: Duration,
    pub message: String,
    /// 1-based loop position; 0 outside loops.
    pub iteration: usize,
    /// Loop item count; 0 outside loops.
    pub total: usize,
    pub branch: Option<String>,
    pub response: Option<ResponseSnapshot>,
    pub tests: Vec<TestResult>,
    pub error: Option<String>,
}

impl StepResult {
    pub fn new(step_index: usize, label: impl Into<String>, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step_index,
            label: label.into(),
            request_name: None,
            status,
            status_text: status.as_str().to_string(),
            duration: Duration::ZERO,
            message: message.into(),
            iteration: 0,
            total: 0,
            branch: None,
            response: None,
            tests: Vec::new(),
            error: None,
        }
    }

    pub fn skipped(step_index: usize, label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(step_index, label, StepStatus::Skipped, reason)
    }

    /// A failure that happened before anything was dispatched.
    pub fn failed(step_index: usize, label: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        let mut result = Self::new(step_index, label, StepStatus::Failed, error.clone());
        result.error = Some(error);
        result
    }

    pub fn with_request(mut self, request_name: impl Into<String>) -> Self {
        self.request_name = Some(request_name.into());
        self
    }

    pub fn with_position(mut self, iteration: usize, total: usize) -> Self {
        self.iteration = iteration;
        self.total = total;
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// Decides whether a recorded result ends the run.
///
/// Used for top-level steps and loop iterations alike. Cancellation always
/// stops; failures stop only under [`OnFailurePolicy::Stop`]; successes and
/// skips never do.
pub fn should_stop(result: &StepResult, policy: OnFailurePolicy) -> bool {
    match result.status {
        StepStatus::Canceled => true,
        StepStatus::Failed => policy == OnFailurePolicy::Stop,
        StepStatus::Succeeded | StepStatus::Skipped => false,
    }
}

/// Cursor over the items of an active for-each step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    pub step_index: usize,
    /// Items evaluated once at loop entry.
    pub items: Vec<String>,
    /// Index of the next item to run.
    pub cursor: usize,
    pub var: String,
    /// Whether each item is also written into workflow scope.
    pub bind_workflow_scope: bool,
}

impl LoopState {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.items.len()
    }
}

/// Continuation for the single in-flight request.
#[derive(Debug, Clone)]
pub struct PendingStep {
    pub token: DispatchToken,
    pub step_index: usize,
    pub label: String,
    pub request_name: String,
    pub iteration: usize,
    pub total: usize,
    /// Branch that dispatched the request, for If/Switch steps.
    pub branch: Option<String>,
    pub dispatched_at: Instant,
}

/// Per-status result counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub canceled: usize,
}

impl RunCounts {
    /// Results that actually ran (everything except skips).
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed + self.canceled
    }
}

/// Mutable, single-owner record of a workflow run.
#[derive(Debug, Clone)]
pub struct RunState {
    pub workflow: WorkflowDefinition,
    pub origin: RunOrigin,
    pub environment: String,
    /// Variables of the selected environment.
    pub environment_vars: IndexMap<String, String>,
    /// Next static step to run.
    pub index: usize,
    pub results: Vec<StepResult>,
    /// Workflow-scoped variables; persist across steps.
    pub vars: IndexMap<String, String>,
    pub loop_state: Option<LoopState>,
    pub current_branch: Option<String>,
    pub canceled: bool,
    pub cancel_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
    pub ended_at: Option<DateTime<Utc>>,
    pub current: Option<PendingStep>,
    /// Step whose failure stopped the run.
    pub stopped_at: Option<usize>,
    /// Step that was running when cancellation took effect.
    pub canceled_at: Option<usize>,
    pub finalized: bool,
}

impl RunState {
    pub fn new(
        workflow: WorkflowDefinition,
        origin: RunOrigin,
        environment: impl Into<String>,
        environment_vars: IndexMap<String, String>,
    ) -> Self {
        let vars = workflow.initial_variables();
        Self {
            workflow,
            origin,
            environment: environment.into(),
            environment_vars,
            index: 0,
            results: Vec::new(),
            vars,
            loop_state: None,
            current_branch: None,
            canceled: false,
            cancel_reason: None,
            started_at: Utc::now(),
            started: Instant::now(),
            ended_at: None,
            current: None,
            stopped_at: None,
            canceled_at: None,
            finalized: false,
        }
    }

    pub fn step_count(&self) -> usize {
        self.workflow.steps.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.current.is_some()
    }

    pub fn counts(&self) -> RunCounts {
        let mut counts = RunCounts::default();
        for result in &self.results {
            match result.status {
                StepStatus::Succeeded => counts.succeeded += 1,
                StepStatus::Failed => counts.failed += 1,
                StepStatus::Skipped => counts.skipped += 1,
                StepStatus::Canceled => counts.canceled += 1,
            }
        }
        counts
    }

    /// Appends a result and reports whether it stops the run.
    pub fn record(&mut self, result: StepResult) -> bool {
        let policy = self
            .workflow
            .steps
            .get(result.step_index)
            .map(|step| self.workflow.policy_for(step))
            .unwrap_or(self.workflow.default_on_failure);
        let stop = should_stop(&result, policy);
        if stop && result.is_failure() {
            self.stopped_at = Some(result.step_index);
        }
        self.results.push(result);
        stop
    }
}
