//! Run finalizer: counts, summary line, textual report, and history hand-off.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use reqterm_types::{RequestDefinition, RequestDocument, RunOutcome, WorkflowHistoryEntry};
use reqterm_util::RunHistoryStore;
use tracing::{debug, warn};

use crate::workflow::definition::render_definition;
use crate::workflow::state::{RunCounts, RunOrigin, RunState, StepResult, StepStatus};

/// Receives one entry per finished workflow run.
pub trait HistoryRecorder: Send + Sync {
    fn append(&self, entry: WorkflowHistoryEntry) -> anyhow::Result<()>;
}

/// Adapts a [`RunHistoryStore`] from `reqterm-util` to [`HistoryRecorder`].
#[derive(Clone)]
pub struct StoreHistoryRecorder {
    store: Arc<dyn RunHistoryStore>,
}

impl StoreHistoryRecorder {
    pub fn new(store: Arc<dyn RunHistoryStore>) -> Self {
        Self { store }
    }
}

impl HistoryRecorder for StoreHistoryRecorder {
    fn append(&self, entry: WorkflowHistoryEntry) -> anyhow::Result<()> {
        self.store.append(entry)?;
        Ok(())
    }
}

/// Everything the finalizer produced for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub workflow_name: String,
    pub workflow_id: String,
    pub origin: RunOrigin,
    pub environment: String,
    pub outcome: RunOutcome,
    /// One-line summary.
    pub summary: String,
    /// Full textual report.
    pub report: String,
    pub counts: RunCounts,
    pub results: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

/// Stable identifier of a workflow: document path plus workflow name.
pub fn workflow_identifier(document: &RequestDocument, workflow_name: &str) -> String {
    let source = document
        .path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<memory>".to_string());
    format!("{source}#{workflow_name}")
}

/// Finalizes a run exactly once.
///
/// Returns `None` when the run was already finalized, so a duplicate
/// completion neither appends history nor produces a second summary.
pub fn finalize_run(
    run: &mut RunState,
    document: &RequestDocument,
    requests: &IndexMap<String, RequestDefinition>,
    history: Option<&dyn HistoryRecorder>,
) -> Option<RunReport> {
    if run.finalized {
        debug!(workflow = %run.workflow.name, "run already finalized");
        return None;
    }
    run.finalized = true;
    run.current = None;
    run.loop_state = None;

    let ended_at = Utc::now();
    run.ended_at = Some(ended_at);
    let duration = run.started.elapsed();
    let counts = run.counts();
    let outcome = if run.canceled {
        RunOutcome::Canceled
    } else if counts.failed > 0 {
        RunOutcome::Failed
    } else {
        RunOutcome::Succeeded
    };

    let summary = build_summary(run, counts);
    let report = build_report(run, &summary, outcome, counts, duration);
    let workflow_id = workflow_identifier(document, &run.workflow.name);

    if run.origin == RunOrigin::Workflow
        && let Some(history) = history
    {
        let entry = WorkflowHistoryEntry {
            executed_at: run.started_at,
            environment: run.environment.clone(),
            workflow_id: workflow_id.clone(),
            workflow_name: run.workflow.name.clone(),
            outcome,
            summary: summary.clone(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            report: report.clone(),
            definition: render_definition(&run.workflow, requests),
        };
        if let Err(error) = history.append(entry) {
            warn!(workflow = %run.workflow.name, error = %error, "failed to record workflow history");
        }
    }

    debug!(workflow = %run.workflow.name, outcome = outcome.as_str(), results = run.results.len(), "run finalized");
    Some(RunReport {
        workflow_name: run.workflow.name.clone(),
        workflow_id,
        origin: run.origin,
        environment: run.environment.clone(),
        outcome,
        summary,
        report,
        counts,
        results: run.results.clone(),
        started_at: run.started_at,
        duration,
    })
}

fn subject(run: &RunState) -> String {
    let noun = match run.origin {
        RunOrigin::Workflow => "workflow",
        RunOrigin::ForEachRequest => "for-each",
    };
    format!("{noun} '{}'", run.workflow.name)
}

fn build_summary(run: &RunState, counts: RunCounts) -> String {
    let subject = subject(run);
    let total_steps = run.step_count();

    if run.canceled {
        let step = run.canceled_at.unwrap_or(run.index).min(total_steps.saturating_sub(1)) + 1;
        let reason = run.cancel_reason.as_deref().unwrap_or("canceled by user");
        return format!("{subject} canceled at step {step}/{total_steps} ({reason})");
    }

    if let Some(stopped_at) = run.stopped_at {
        let failure = run.results.iter().rev().find(|result| result.is_failure());
        let label = failure.map(|result| result.label.as_str()).unwrap_or_default();
        let message = failure.map(|result| result.message.as_str()).unwrap_or_default();
        return format!("{subject} failed at step {}/{total_steps} ({label}): {message}", stopped_at + 1);
    }

    if counts.failed > 0 {
        let noun = if counts.failed == 1 { "failure" } else { "failures" };
        return format!(
            "{subject} finished with {} {noun}: {}/{} passed",
            counts.failed,
            counts.succeeded,
            counts.attempted()
        );
    }

    let mut summary = format!("{subject} succeeded: {}/{} passed", counts.succeeded, counts.attempted());
    if counts.skipped > 0 {
        summary.push_str(&format!(", {} skipped", counts.skipped));
    }
    summary
}

fn build_report(run: &RunState, summary: &str, outcome: RunOutcome, counts: RunCounts, duration: Duration) -> String {
    let mut lines = vec![
        format!("Workflow: {}", run.workflow.name),
        format!("Environment: {}", if run.environment.is_empty() { "(none)" } else { &run.environment }),
        format!("Started: {}", run.started_at.to_rfc3339()),
        format!("Duration: {} ms", duration.as_millis()),
        format!("Outcome: {}", outcome.as_str()),
        format!("Summary: {summary}"),
        String::new(),
    ];
    lines.extend(run.results.iter().map(report_line));
    lines.push(String::new());
    lines.push(format!(
        "Totals: {} succeeded, {} failed, {} skipped, {} canceled",
        counts.succeeded, counts.failed, counts.skipped, counts.canceled
    ));
    lines.join("\n")
}

fn report_line(result: &StepResult) -> String {
    let mut line = format!("{} {}. {}", result.status.marker(), result.step_index + 1, result.label);
    if result.total > 0 {
        line.push_str(&format!(" [{}/{}]", result.iteration, result.total));
    }
    if let Some(branch) = &result.branch {
        line.push_str(&format!(" <{branch}>"));
    }
    if let Some(request) = &result.request_name
        && request != &result.label
    {
        line.push_str(&format!(" -> {request}"));
    }
    line.push_str(&format!(" {}", result.status_text));
    if result.status != StepStatus::Skipped {
        line.push_str(&format!(" ({} ms)", result.duration.as_millis()));
    }
    if !result.message.is_empty() {
        line.push_str(&format!(" - {}", result.message));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use reqterm_types::{OnFailurePolicy, RequestStep, WorkflowDefinition, WorkflowStep};

    #[derive(Default)]
    struct CountingRecorder {
        entries: Mutex<Vec<WorkflowHistoryEntry>>,
    }

    impl HistoryRecorder for CountingRecorder {
        fn append(&self, entry: WorkflowHistoryEntry) -> anyhow::Result<()> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn run_with_steps(names: &[&str], origin: RunOrigin) -> RunState {
        let workflow = WorkflowDefinition {
            name: "checkout".into(),
            steps: names
                .iter()
                .map(|name| {
                    WorkflowStep::Request(RequestStep {
                        using: (*name).into(),
                        ..RequestStep::default()
                    })
                })
                .collect(),
            ..WorkflowDefinition::default()
        };
        RunState::new(workflow, origin, "dev", IndexMap::new())
    }

    fn ok(index: usize, label: &str) -> StepResult {
        StepResult::new(index, label, StepStatus::Succeeded, "").with_request(label)
    }

    #[test]
    fn success_summary_reports_all_passed() {
        let mut run = run_with_steps(&["A", "B"], RunOrigin::Workflow);
        run.record(ok(0, "A"));
        run.record(ok(1, "B"));

        let report = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), None).unwrap();
        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert!(report.summary.contains("2/2 passed"), "{}", report.summary);
        assert!(report.report.contains("[ok]   1. A"));
        assert!(report.report.contains("Totals: 2 succeeded, 0 failed, 0 skipped, 0 canceled"));
    }

    #[test]
    fn stopped_summary_names_step_and_reason() {
        let mut run = run_with_steps(&["A", "B", "C"], RunOrigin::Workflow);
        run.record(ok(0, "A"));
        run.record(StepResult::failed(1, "B", "request failed with status 500 Internal Server Error"));

        let report = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), None).unwrap();
        assert_eq!(report.outcome, RunOutcome::Failed);
        assert_eq!(
            report.summary,
            "workflow 'checkout' failed at step 2/3 (B): request failed with status 500 Internal Server Error"
        );
    }

    #[test]
    fn partial_failure_summary_counts_failures() {
        let mut run = run_with_steps(&["A", "B", "C"], RunOrigin::Workflow);
        run.workflow.default_on_failure = OnFailurePolicy::Continue;
        run.record(ok(0, "A"));
        run.record(StepResult::failed(1, "B", "boom"));
        run.record(ok(2, "C"));

        let report = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), None).unwrap();
        assert!(report.summary.contains("finished with 1 failure: 2/3 passed"), "{}", report.summary);
    }

    #[test]
    fn canceled_summary_excludes_canceled_step_from_failures() {
        let mut run = run_with_steps(&["A", "B", "C", "D"], RunOrigin::Workflow);
        run.record(ok(0, "A"));
        run.canceled = true;
        run.canceled_at = Some(1);
        run.record(StepResult::new(1, "B", StepStatus::Canceled, "canceled by user"));

        let report = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), None).unwrap();
        assert_eq!(report.outcome, RunOutcome::Canceled);
        assert!(report.summary.contains("canceled at step 2/4"), "{}", report.summary);
        assert_eq!(report.counts.failed, 0);
        assert_eq!(report.counts.canceled, 1);
    }

    #[test]
    fn finalize_twice_records_once() {
        let recorder = CountingRecorder::default();
        let mut run = run_with_steps(&["A"], RunOrigin::Workflow);
        run.record(ok(0, "A"));

        let first = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), Some(&recorder));
        let second = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), Some(&recorder));

        assert!(first.is_some());
        assert!(second.is_none());
        let entries = recorder.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].workflow_id, "<memory>#checkout");
        assert!(entries[0].definition.contains("# @workflow checkout"));
    }

    #[test]
    fn for_each_runs_are_not_recorded() {
        let recorder = CountingRecorder::default();
        let mut run = run_with_steps(&["list"], RunOrigin::ForEachRequest);
        run.record(ok(0, "list").with_position(1, 1));

        let report = finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), Some(&recorder)).unwrap();
        assert!(report.summary.starts_with("for-each 'checkout'"));
        assert!(recorder.entries.lock().unwrap().is_empty());
    }

    #[test]
    fn store_adapter_appends_to_history_store() {
        let store = Arc::new(reqterm_util::InMemoryRunHistory::new());
        let recorder = StoreHistoryRecorder::new(store.clone());
        let mut run = run_with_steps(&["A"], RunOrigin::Workflow);
        run.record(ok(0, "A"));

        finalize_run(&mut run, &RequestDocument::default(), &IndexMap::new(), Some(&recorder));
        assert_eq!(store.entries().unwrap().len(), 1);
    }
}
