//! For-each loop controller.
//!
//! Items are evaluated once at loop entry. Each iteration binds the loop
//! variable into the request scope (and into workflow scope for named
//! workflow runs), evaluates the step guard for that item, and either
//! dispatches or records a skipped sub-result without touching the in-flight
//! slot.

use indexmap::IndexMap;
use reqterm_types::{ForEachSpec, RequestDefinition, WorkflowStep};
use tracing::debug;

use crate::resolve::{evaluate_condition, items_from_value};
use crate::workflow::dispatch::{Dispatcher, LoopPosition, LoopStep, StepOutcome, failed_result, skipped_result};
use crate::workflow::state::{LoopState, RunOrigin, RunState, StepResult};

impl Dispatcher<'_> {
    /// Evaluates the item list and installs the loop cursor.
    pub(super) fn enter_loop(&mut self, run: &mut RunState, request: &RequestDefinition, spec: &ForEachSpec) -> StepOutcome {
        let no_vars = IndexMap::new();
        let scope = self.scope(run, Some(request), &no_vars, &no_vars);
        let items = self.evaluator.eval(&spec.items, &scope).and_then(items_from_value);

        match items {
            Err(error) => StepOutcome::Record(
                failed_result(run, format!("for-each items `{}`: {error}", spec.items), LoopPosition::NONE).with_request(request.name.clone()),
            ),
            Ok(items) if items.is_empty() => {
                StepOutcome::Record(skipped_result(run, "for-each produced no items", LoopPosition::NONE).with_request(request.name.clone()))
            }
            Ok(items) => {
                debug!(step = run.index, items = items.len(), var = %spec.var, "entering for-each loop");
                run.loop_state = Some(LoopState {
                    step_index: run.index,
                    items,
                    cursor: 0,
                    var: spec.var.trim().to_string(),
                    bind_workflow_scope: run.origin == RunOrigin::Workflow,
                });
                StepOutcome::EnterLoop
            }
        }
    }

    /// Handles the next item of the active loop.
    pub(super) fn next_iteration(&mut self, run: &mut RunState) -> LoopStep {
        let Some(loop_state) = run.loop_state.as_mut() else {
            return LoopStep::Done;
        };
        if loop_state.is_exhausted() {
            return LoopStep::Done;
        }

        let item = loop_state.items[loop_state.cursor].clone();
        loop_state.cursor += 1;
        let position = LoopPosition {
            iteration: loop_state.cursor,
            total: loop_state.total(),
        };
        let var = loop_state.var.clone();
        if loop_state.bind_workflow_scope {
            run.vars.insert(var.clone(), item.clone());
        }
        let mut loop_vars = IndexMap::new();
        loop_vars.insert(var, item);

        let Some(step) = run.workflow.steps.get(run.index).and_then(WorkflowStep::request_step).cloned() else {
            return LoopStep::Done;
        };
        let requests = self.requests;
        let Some(request) = requests.get(step.using.trim()) else {
            let result = failed_result(run, format!("unknown request '{}'", step.using), position);
            return self.record_iteration(run, result);
        };

        if let Some(guard) = step.when.as_deref() {
            let scope = self.scope(run, Some(request), &IndexMap::new(), &loop_vars);
            match evaluate_condition(self.evaluator, guard, &scope) {
                Ok(true) => {}
                Ok(false) => {
                    let result = skipped_result(run, format!("condition `{guard}` is false"), position).with_request(request.name.clone());
                    return self.record_iteration(run, result);
                }
                Err(error) => {
                    let result = failed_result(run, format!("when `{guard}`: {error}"), position).with_request(request.name.clone());
                    return self.record_iteration(run, result);
                }
            }
        }

        match self.dispatch(run, request, &step.vars, &loop_vars, position) {
            Ok(request) => LoopStep::Dispatch(request),
            Err(result) => self.record_iteration(run, result),
        }
    }

    fn record_iteration(&self, run: &mut RunState, result: StepResult) -> LoopStep {
        self.report_result(run, &result);
        LoopStep::Recorded { stop: run.record(result) }
    }
}
