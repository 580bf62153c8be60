//! # Reqterm Engine
//!
//! The reqterm engine runs multi-step request workflows: sequential request
//! steps, `@if`/`@switch` branches, and for-each loops, with scoped variables,
//! per-step failure policies, cooperative cancellation, and a textual run
//! report recorded in history.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use reqterm_engine::{EngineCommand, WorkflowSession, parse_document_str};
//! use reqterm_types::ResponseSnapshot;
//!
//! let document = parse_document_str(r#"
//! requests:
//!   - name: health
//!     url: https://example.com/health
//! workflows:
//!   - name: smoke
//!     steps:
//!       - kind: request
//!         using: health
//! "#)?;
//!
//! let mut session = WorkflowSession::new(Arc::new(document));
//! let EngineCommand::Dispatch(request) = session.start_workflow("smoke", "")? else {
//!     panic!("expected a dispatch");
//! };
//! match session.handle_response(request.respond(ResponseSnapshot::http(200, "200 OK"))) {
//!     EngineCommand::Completed(report) => assert!(report.succeeded()),
//!     other => panic!("unexpected command: {other:?}"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`workflow`**: session, run state, dispatcher, for-each controller,
//!   classifier, validator, and finalizer
//! - **`resolve`**: condition evaluation and `{{name}}` interpolation
//! - **`executor`**: the request execution seam and its HTTP implementation

use std::{fs, path::Path};

use anyhow::{Context, Result};
use reqterm_types::RequestDocument;

pub mod error;
pub mod executor;
pub mod resolve;
pub mod workflow;

pub use error::{EngineError, EvaluationError, ValidationError};
pub use executor::{DispatchRequest, DispatchToken, HttpRequestExecutor, RequestExecutor, RequestOutcome};
pub use resolve::{ConditionEvaluator, TemplateEvaluator};
pub use workflow::{
    EngineCommand, HistoryRecorder, RunControl, RunReport, RunState, RunTarget, StatusLevel, StatusReporter, StepResult, StepStatus,
    StoreHistoryRecorder, WorkflowSession, drive_workflow_run, render_definition, validate_workflow,
};

/// Loads a request document from the filesystem.
///
/// Files ending in `.json` are parsed as JSON; everything else as YAML. The
/// returned document remembers its path, which becomes part of the workflow
/// identifiers written to history.
pub fn parse_document_file(file_path: impl AsRef<Path>) -> Result<RequestDocument> {
    let file_path = file_path.as_ref();
    let content = fs::read_to_string(file_path).with_context(|| format!("failed to read request document: {}", file_path.display()))?;

    let is_json = file_path
        .extension()
        .and_then(|extension| extension.to_str())
        .is_some_and(|extension| extension.eq_ignore_ascii_case("json"));
    let mut document: RequestDocument = if is_json {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON request document: {}", file_path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML request document: {}", file_path.display()))?
    };
    document.path = Some(file_path.to_path_buf());
    Ok(document)
}

/// Parses a YAML (or JSON) request document from a string.
pub fn parse_document_str(content: &str) -> Result<RequestDocument> {
    serde_yaml::from_str(content).context("invalid request document")
}
