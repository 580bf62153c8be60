//! Asynchronous driver that runs a session to completion on Tokio.
//!
//! Each dispatch is executed on its own task and the outcome is posted back
//! over an unbounded channel. The caller owns the control sender and may
//! request cancellation at any time; it is applied at the next response.

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::executor::{DispatchRequest, RequestExecutor, RequestOutcome};
use crate::workflow::report::RunReport;
use crate::workflow::session::{EngineCommand, WorkflowSession};

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    /// A named workflow from the document.
    Workflow(String),
    /// An ad-hoc loop over one request's own for-each spec.
    ForEach(String),
}

/// Commands accepted while a run is in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunControl {
    Cancel { reason: Option<String> },
}

/// Drives one run until the session reports completion.
pub async fn drive_workflow_run(
    session: &mut WorkflowSession,
    target: RunTarget,
    environment: &str,
    executor: Arc<dyn RequestExecutor>,
    mut control_rx: UnboundedReceiver<RunControl>,
) -> Result<RunReport, EngineError> {
    let mut command = match &target {
        RunTarget::Workflow(name) => session.start_workflow(name, environment)?,
        RunTarget::ForEach(request) => session.start_for_each(request, environment)?,
    };

    let (outcome_tx, mut outcome_rx) = unbounded_channel::<RequestOutcome>();
    let mut control_open = true;

    loop {
        match command {
            EngineCommand::Completed(report) => return Ok(report),
            EngineCommand::Dispatch(request) => spawn_dispatch(Arc::clone(&executor), request, outcome_tx.clone()),
            EngineCommand::Idle if !session.is_running() => return Err(EngineError::NoActiveRun),
            EngineCommand::Idle => {}
        }

        command = tokio::select! {
            biased;
            control = control_rx.recv(), if control_open => match control {
                Some(RunControl::Cancel { reason }) => session.cancel(reason),
                None => {
                    control_open = false;
                    EngineCommand::Idle
                }
            },
            outcome = outcome_rx.recv() => match outcome {
                Some(outcome) => session.handle_response(outcome),
                None => return Err(EngineError::ChannelClosed),
            },
        };
    }
}

/// Executes one request on a task and posts its outcome.
///
/// A panicking executor still produces exactly one outcome for the dispatch.
fn spawn_dispatch(executor: Arc<dyn RequestExecutor>, request: DispatchRequest, outcome_tx: UnboundedSender<RequestOutcome>) {
    debug!(token = %request.token, request = %request.request.name, "spawning request dispatch");
    tokio::spawn(async move {
        let fallback = request.clone();
        let handle = tokio::spawn(async move { executor.dispatch(request).await });
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(token = %fallback.token, error = %error, "request executor task failed");
                fallback.fail(format!("executor task failed: {error}"))
            }
        };
        if outcome_tx.send(outcome).is_err() {
            debug!("run finished before request outcome arrived");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use reqterm_types::{RequestDocument, ResponseSnapshot, RunOutcome};
    use reqterm_util::InMemoryRunHistory;
    use tokio::sync::Notify;

    use crate::workflow::report::StoreHistoryRecorder;
    use crate::workflow::state::StepStatus;

    const DOCUMENT: &str = r#"
requests:
  - name: ping
    url: https://example.com/ping
workflows:
  - name: four
    steps:
      - { kind: request, using: ping, name: one }
      - { kind: request, using: ping, name: two }
      - { kind: request, using: ping, name: three }
      - { kind: request, using: ping, name: four }
"#;

    fn session() -> WorkflowSession {
        let document: RequestDocument = serde_yaml::from_str(DOCUMENT).unwrap();
        WorkflowSession::new(Arc::new(document))
    }

    /// Answers 200 to everything; optionally parks one call until released.
    struct GatedExecutor {
        calls: AtomicUsize,
        park_on_call: usize,
        parked: UnboundedSender<()>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl RequestExecutor for GatedExecutor {
        async fn dispatch(&self, request: DispatchRequest) -> RequestOutcome {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.park_on_call {
                let _ = self.parked.send(());
                self.gate.notified().await;
            }
            request.respond(ResponseSnapshot::http(200, "200 OK"))
        }
    }

    fn executor(park_on_call: usize) -> (Arc<GatedExecutor>, UnboundedReceiver<()>, Arc<Notify>) {
        let (parked, parked_rx) = unbounded_channel();
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(GatedExecutor {
            calls: AtomicUsize::new(0),
            park_on_call,
            parked,
            gate: Arc::clone(&gate),
        });
        (executor, parked_rx, gate)
    }

    #[tokio::test]
    async fn runs_all_steps_and_records_history() {
        let store = Arc::new(InMemoryRunHistory::new());
        let mut session = session().with_history(Arc::new(StoreHistoryRecorder::new(store.clone())));
        let (executor, _parked, _gate) = executor(0);
        let (_control_tx, control_rx) = unbounded_channel();

        let report = drive_workflow_run(&mut session, RunTarget::Workflow("four".into()), "", executor.clone(), control_rx)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert!(report.summary.contains("4/4 passed"), "{}", report.summary);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
        assert!(!session.is_running());

        let entries = reqterm_util::RunHistoryStore::entries(store.as_ref()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].workflow_id, "<memory>#four");
    }

    #[tokio::test]
    async fn cancel_applies_when_in_flight_request_returns() {
        let mut session = session();
        let (executor, mut parked, gate) = executor(2);
        let (control_tx, control_rx) = unbounded_channel();

        let drive = drive_workflow_run(&mut session, RunTarget::Workflow("four".into()), "", executor.clone(), control_rx);
        let controller = async move {
            parked.recv().await;
            control_tx.send(RunControl::Cancel { reason: None }).unwrap();
            gate.notify_one();
            control_tx
        };
        let (report, _control_tx) = tokio::join!(drive, controller);
        let report = report.unwrap();

        assert_eq!(report.outcome, RunOutcome::Canceled);
        assert!(report.summary.contains("canceled at step 2/4"), "{}", report.summary);
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].status, StepStatus::Canceled);
        assert_eq!(report.counts.failed, 0);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_workflow_fails_before_dispatch() {
        let mut session = session();
        let (executor, _parked, _gate) = executor(0);
        let (_control_tx, control_rx) = unbounded_channel();

        let error = drive_workflow_run(&mut session, RunTarget::Workflow("missing".into()), "", executor.clone(), control_rx)
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::WorkflowNotFound(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }
}
