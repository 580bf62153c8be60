//! Client session owning at most one workflow run.
//!
//! The session is a synchronous state machine: every entry point returns an
//! [`EngineCommand`] telling the caller whether to dispatch a request, report a
//! completed run, or wait. I/O lives entirely in the caller (see
//! [`drive_workflow_run`](crate::workflow::runner::drive_workflow_run)).

use std::sync::Arc;

use indexmap::IndexMap;
use reqterm_types::{
    ForEachStep, OnFailurePolicy, RequestDefinition, RequestDocument, RequestStep, RunOutcome, WorkflowDefinition, WorkflowStep,
};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::executor::{DispatchRequest, RequestOutcome};
use crate::resolve::{ConditionEvaluator, TemplateEvaluator};
use crate::workflow::dispatch::{Dispatcher, Transition};
use crate::workflow::report::{HistoryRecorder, RunReport, finalize_run};
use crate::workflow::state::{RunOrigin, RunState};
use crate::workflow::status::{StatusLevel, StatusReporter, TracingStatusReporter};
use crate::workflow::validate::validate_workflow;

/// What the caller should do after a session transition.
#[derive(Debug)]
pub enum EngineCommand {
    /// Execute this request and feed the outcome to [`WorkflowSession::handle_response`].
    Dispatch(DispatchRequest),
    /// The run finished; the session is idle again.
    Completed(RunReport),
    /// Nothing to do: the message was stale or the run is still waiting.
    Idle,
}

pub struct WorkflowSession {
    document: Arc<RequestDocument>,
    requests: IndexMap<String, RequestDefinition>,
    evaluator: Arc<dyn ConditionEvaluator>,
    reporter: Arc<dyn StatusReporter>,
    history: Option<Arc<dyn HistoryRecorder>>,
    run: Option<RunState>,
    next_token: u64,
}

impl WorkflowSession {
    /// Creates a session with the template evaluator and tracing reporter.
    pub fn new(document: Arc<RequestDocument>) -> Self {
        let requests = document.request_index();
        Self {
            document,
            requests,
            evaluator: Arc::new(TemplateEvaluator),
            reporter: Arc::new(TracingStatusReporter),
            history: None,
            run: None,
            next_token: 1,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn document(&self) -> &RequestDocument {
        &self.document
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Read-only view of the active run, if any.
    pub fn run_state(&self) -> Option<&RunState> {
        self.run.as_ref()
    }

    /// Validates and starts the named workflow.
    pub fn start_workflow(&mut self, name: &str, environment: &str) -> Result<EngineCommand, EngineError> {
        self.ensure_idle()?;
        let workflow = self
            .document
            .find_workflow(name)
            .cloned()
            .ok_or_else(|| EngineError::WorkflowNotFound(name.to_string()))?;

        if let Err(error) = validate_workflow(&workflow, &self.requests) {
            self.reporter.notify(&error.to_string(), StatusLevel::Error);
            return Err(error.into());
        }

        let environment_vars = self.environment_variables(environment)?;
        let run = RunState::new(workflow, RunOrigin::Workflow, environment, environment_vars);
        Ok(self.begin(run))
    }

    /// Starts an ad-hoc run looping a single request over its own for-each spec.
    ///
    /// Failures of individual items never stop the loop, and the run is not
    /// recorded in history.
    pub fn start_for_each(&mut self, request_name: &str, environment: &str) -> Result<EngineCommand, EngineError> {
        self.ensure_idle()?;
        let request = self
            .requests
            .get(request_name)
            .ok_or_else(|| EngineError::RequestNotFound(request_name.to_string()))?;
        let spec = request
            .for_each
            .clone()
            .ok_or_else(|| EngineError::MissingForEach(request_name.to_string()))?;

        let workflow = WorkflowDefinition {
            name: request.name.clone(),
            default_on_failure: OnFailurePolicy::Continue,
            steps: vec![WorkflowStep::ForEach(ForEachStep {
                request: RequestStep {
                    using: request.name.clone(),
                    ..RequestStep::default()
                },
                for_each: Some(spec),
            })],
            ..WorkflowDefinition::default()
        };
        validate_workflow(&workflow, &self.requests)?;

        let environment_vars = self.environment_variables(environment)?;
        let run = RunState::new(workflow, RunOrigin::ForEachRequest, environment, environment_vars);
        Ok(self.begin(run))
    }

    /// Resumes the run with the outcome of the in-flight request.
    ///
    /// Outcomes whose token does not match the waiting continuation are stale
    /// or duplicated and are ignored.
    pub fn handle_response(&mut self, outcome: RequestOutcome) -> EngineCommand {
        let Some(run) = self.run.as_mut() else {
            debug!(token = %outcome.token, "ignoring outcome without an active run");
            return EngineCommand::Idle;
        };
        let Some(pending) = run.current.take_if(|pending| pending.token == outcome.token) else {
            debug!(token = %outcome.token, "ignoring stale request outcome");
            return EngineCommand::Idle;
        };

        let mut dispatcher = Dispatcher {
            document: &self.document,
            requests: &self.requests,
            evaluator: self.evaluator.as_ref(),
            reporter: self.reporter.as_ref(),
            next_token: &mut self.next_token,
        };
        match dispatcher.resume(run, pending, outcome) {
            Transition::Dispatch(request) => EngineCommand::Dispatch(request),
            Transition::Finished => self.finish(),
        }
    }

    /// Latches cancellation.
    ///
    /// With a request in flight the run stops when its outcome arrives; the
    /// step is then recorded as canceled. Otherwise the run finishes now.
    pub fn cancel(&mut self, reason: Option<String>) -> EngineCommand {
        let Some(run) = self.run.as_mut() else {
            warn!("cancel requested without an active run");
            return EngineCommand::Idle;
        };
        if run.canceled {
            return EngineCommand::Idle;
        }

        run.canceled = true;
        let reason = reason.filter(|text| !text.trim().is_empty()).unwrap_or_else(|| "canceled by user".to_string());
        info!(workflow = %run.workflow.name, step = run.index, reason = %reason, "workflow cancel requested");
        self.reporter
            .notify(&format!("canceling workflow '{}': {reason}", run.workflow.name), StatusLevel::Warn);
        run.cancel_reason = Some(reason);

        if run.is_in_flight() {
            return EngineCommand::Idle;
        }
        run.canceled_at = Some(run.index);
        self.finish()
    }

    fn ensure_idle(&self) -> Result<(), EngineError> {
        if let Some(run) = &self.run {
            warn!(active = %run.workflow.name, "rejecting run start while another run is active");
            self.reporter
                .notify(&format!("workflow '{}' is already running", run.workflow.name), StatusLevel::Warn);
            return Err(EngineError::RunActive);
        }
        Ok(())
    }

    fn environment_variables(&self, environment: &str) -> Result<IndexMap<String, String>, EngineError> {
        let environment = environment.trim();
        if environment.is_empty() {
            return Ok(IndexMap::new());
        }
        self.document
            .environments
            .get(environment)
            .cloned()
            .ok_or_else(|| EngineError::EnvironmentNotFound(environment.to_string()))
    }

    fn begin(&mut self, run: RunState) -> EngineCommand {
        info!(workflow = %run.workflow.name, steps = run.step_count(), environment = %run.environment, "workflow run started");
        self.reporter.notify(
            &format!("running workflow '{}' ({} steps)", run.workflow.name, run.step_count()),
            StatusLevel::Info,
        );
        let run = self.run.insert(run);

        let mut dispatcher = Dispatcher {
            document: &self.document,
            requests: &self.requests,
            evaluator: self.evaluator.as_ref(),
            reporter: self.reporter.as_ref(),
            next_token: &mut self.next_token,
        };
        match dispatcher.advance(run) {
            Transition::Dispatch(request) => EngineCommand::Dispatch(request),
            Transition::Finished => self.finish(),
        }
    }

    fn finish(&mut self) -> EngineCommand {
        let Some(mut run) = self.run.take() else {
            return EngineCommand::Idle;
        };
        let Some(report) = finalize_run(&mut run, &self.document, &self.requests, self.history.as_deref()) else {
            return EngineCommand::Idle;
        };

        let level = match report.outcome {
            RunOutcome::Succeeded => StatusLevel::Info,
            RunOutcome::Failed | RunOutcome::Canceled => StatusLevel::Warn,
        };
        self.reporter.notify(&report.summary, level);
        info!(workflow = %report.workflow_name, outcome = report.outcome.as_str(), duration_ms = report.duration.as_millis() as u64, "workflow run finished");
        EngineCommand::Completed(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use reqterm_types::ResponseSnapshot;

    #[derive(Default)]
    struct RecordingReporter {
        lines: Mutex<Vec<(String, StatusLevel)>>,
    }

    impl StatusReporter for RecordingReporter {
        fn notify(&self, text: &str, level: StatusLevel) {
            self.lines.lock().unwrap().push((text.to_string(), level));
        }
    }

    fn document() -> Arc<RequestDocument> {
        let yaml = r#"
environments:
  dev:
    base: https://dev.example.com
requests:
  - name: ping
    url: "{{base}}/ping"
  - name: item
    url: "{{base}}/items/{{id}}"
    for_each:
      items: '["a", "b"]'
      as: id
workflows:
  - name: smoke
    steps:
      - kind: request
        using: ping
      - kind: request
        using: ping
"#;
        Arc::new(serde_yaml::from_str(yaml).unwrap())
    }

    fn dispatched(command: EngineCommand) -> DispatchRequest {
        match command {
            EngineCommand::Dispatch(request) => request,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_second_run_with_warning() {
        let reporter = Arc::new(RecordingReporter::default());
        let mut session = WorkflowSession::new(document()).with_reporter(reporter.clone());
        dispatched(session.start_workflow("smoke", "dev").unwrap());

        let error = session.start_workflow("smoke", "dev").unwrap_err();
        assert!(matches!(error, EngineError::RunActive));
        let lines = reporter.lines.lock().unwrap();
        assert!(lines.iter().any(|(text, level)| text.contains("already running") && *level == StatusLevel::Warn));
    }

    #[test]
    fn interpolation_scope_includes_environment() {
        let mut session = WorkflowSession::new(document());
        let request = dispatched(session.start_workflow("smoke", "dev").unwrap());
        assert_eq!(request.variables.get("base").map(String::as_str), Some("https://dev.example.com"));
        assert_eq!(request.step_label, "ping");
    }

    #[test]
    fn stale_outcomes_are_ignored() {
        let mut session = WorkflowSession::new(document());
        let first = dispatched(session.start_workflow("smoke", "dev").unwrap());
        let second = dispatched(session.handle_response(first.respond(ResponseSnapshot::http(200, "200 OK"))));

        assert!(matches!(session.handle_response(first.respond(ResponseSnapshot::http(200, "200 OK"))), EngineCommand::Idle));
        assert_eq!(session.run_state().map(|run| run.results.len()), Some(1));

        match session.handle_response(second.respond(ResponseSnapshot::http(200, "200 OK"))) {
            EngineCommand::Completed(report) => assert_eq!(report.counts.succeeded, 2),
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(!session.is_running());
    }

    #[test]
    fn unknown_environment_is_rejected() {
        let mut session = WorkflowSession::new(document());
        let error = session.start_workflow("smoke", "prod").unwrap_err();
        assert!(matches!(error, EngineError::EnvironmentNotFound(name) if name == "prod"));
        assert!(!session.is_running());
    }

    #[test]
    fn for_each_request_uses_its_own_loop() {
        let mut session = WorkflowSession::new(document());
        let first = dispatched(session.start_for_each("item", "dev").unwrap());
        assert_eq!(first.variables.get("id").map(String::as_str), Some("a"));

        let second = dispatched(session.handle_response(first.respond(ResponseSnapshot::http(500, "500 Internal Server Error"))));
        assert_eq!(second.variables.get("id").map(String::as_str), Some("b"));
        assert!(!session.run_state().unwrap().vars.contains_key("id"));

        match session.handle_response(second.respond(ResponseSnapshot::http(200, "200 OK"))) {
            EngineCommand::Completed(report) => {
                assert_eq!(report.origin, RunOrigin::ForEachRequest);
                assert_eq!(report.counts.failed, 1);
                assert_eq!(report.results.len(), 2);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn for_each_requires_a_loop_spec() {
        let mut session = WorkflowSession::new(document());
        assert!(matches!(session.start_for_each("ping", "dev"), Err(EngineError::MissingForEach(_))));
        assert!(matches!(session.start_for_each("missing", "dev"), Err(EngineError::RequestNotFound(_))));
    }
}
