//! Error types surfaced by the workflow engine.

use thiserror::Error;

/// Definition problems detected before a run starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow '{workflow}' has no steps")]
    NoSteps { workflow: String },
    /// A step-level problem; `step` is 1-based.
    #[error("workflow '{workflow}' step {step}: {reason}")]
    Step { workflow: String, step: usize, reason: String },
}

/// Failure raised while evaluating a condition, template, or item list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct EvaluationError(pub String);

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors returned by [`WorkflowSession`](crate::WorkflowSession) and the run loop.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a workflow run is already active")]
    RunActive,
    #[error("no workflow run is active")]
    NoActiveRun,
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),
    #[error("request '{0}' not found")]
    RequestNotFound(String),
    #[error("request '{0}' does not declare a for-each loop")]
    MissingForEach(String),
    #[error("environment '{0}' is not declared in the document")]
    EnvironmentNotFound(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("request outcome channel closed before the run finished")]
    ChannelClosed,
}
