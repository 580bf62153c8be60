//! Workflow interpretation.
//!
//! [`WorkflowSession`] owns the single active [`RunState`]. The dispatcher
//! walks steps, the for-each controller expands loops, the classifier turns
//! outcomes into results, and the finalizer produces the [`RunReport`].
//! [`drive_workflow_run`] connects a session to a [`RequestExecutor`](crate::executor::RequestExecutor)
//! on Tokio.

pub mod classify;
pub mod definition;
mod dispatch;
mod foreach;
pub mod report;
pub mod runner;
pub mod scope;
pub mod session;
pub mod state;
pub mod status;
pub mod validate;

pub use classify::{Classification, classify};
pub use definition::render_definition;
pub use report::{HistoryRecorder, RunReport, StoreHistoryRecorder, finalize_run, workflow_identifier};
pub use runner::{RunControl, RunTarget, drive_workflow_run};
pub use session::{EngineCommand, WorkflowSession};
pub use state::{LoopState, PendingStep, RunCounts, RunOrigin, RunState, StepResult, StepStatus, should_stop};
pub use status::{StatusLevel, StatusReporter, TracingStatusReporter};
pub use validate::validate_workflow;
