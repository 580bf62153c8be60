//! Request execution collaborator.
//!
//! The engine never performs I/O itself: each dispatch is handed to a
//! [`RequestExecutor`] and the engine resumes when the matching
//! [`RequestOutcome`] comes back carrying the same [`DispatchToken`].

use std::fmt;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqterm_types::{RequestDefinition, ResponseSnapshot, TestResult};

pub mod http;

pub use http::HttpRequestExecutor;

/// Identifies one dispatch so its outcome can be matched to the waiting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatchToken(pub u64);

impl fmt::Display for DispatchToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request ready to execute, with its fully merged variable scope.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub token: DispatchToken,
    /// Clone of the named request; templates are not yet interpolated.
    pub request: RequestDefinition,
    /// Merged scope the executor interpolates templates with.
    pub variables: IndexMap<String, String>,
    pub environment: String,
    /// 0-based index of the owning workflow step.
    pub step_index: usize,
    pub step_label: String,
}

impl DispatchRequest {
    /// Outcome carrying a response for this dispatch.
    pub fn respond(&self, response: ResponseSnapshot) -> RequestOutcome {
        RequestOutcome {
            response: Some(response),
            ..RequestOutcome::empty(self)
        }
    }

    /// Outcome carrying a transport error for this dispatch.
    pub fn fail(&self, error: impl Into<String>) -> RequestOutcome {
        RequestOutcome {
            error: Some(error.into()),
            ..RequestOutcome::empty(self)
        }
    }
}

/// Everything the executor reports back for one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub token: DispatchToken,
    pub response: Option<ResponseSnapshot>,
    /// Transport-level failure text.
    pub error: Option<String>,
    pub tests: Vec<TestResult>,
    pub script_error: Option<String>,
    /// The request as it was executed. Executors that interpolate templates
    /// report the resolved url, headers, and body here.
    pub request: RequestDefinition,
    pub environment: String,
}

impl RequestOutcome {
    fn empty(dispatch: &DispatchRequest) -> Self {
        Self {
            token: dispatch.token,
            response: None,
            error: None,
            tests: Vec::new(),
            script_error: None,
            request: dispatch.request.clone(),
            environment: dispatch.environment.clone(),
        }
    }

    pub fn with_tests(mut self, tests: Vec<TestResult>) -> Self {
        self.tests = tests;
        self
    }

    pub fn with_script_error(mut self, error: impl Into<String>) -> Self {
        self.script_error = Some(error.into());
        self
    }

    /// Replaces the template copy with the request that actually went out.
    pub fn with_request(mut self, request: RequestDefinition) -> Self {
        self.request = request;
        self
    }
}

/// Executes requests on behalf of the engine.
///
/// Implementations must deliver exactly one outcome per dispatch; failures are
/// reported inside the outcome rather than as a `Result`.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> RequestOutcome;
}
