//! Step dispatcher: the state-transition function of a run.
//!
//! [`Dispatcher::advance`] walks steps synchronously until it either issues a
//! request (and stores the continuation in [`RunState::current`]) or runs out
//! of work. [`Dispatcher::resume`] consumes the matching outcome and continues.

use std::time::Instant;

use indexmap::IndexMap;
use reqterm_types::{
    BranchAction, BranchOutcome, ForEachSpec, IfStep, RequestDefinition, RequestDocument, RequestStep, SwitchStep, WorkflowStep,
};
use tracing::debug;

use crate::executor::{DispatchRequest, DispatchToken, RequestOutcome};
use crate::resolve::{ConditionEvaluator, evaluate_condition, interpolate_map, values_equal};
use crate::workflow::classify::classify;
use crate::workflow::scope;
use crate::workflow::state::{PendingStep, RunState, StepResult, StepStatus};
use crate::workflow::status::{StatusLevel, StatusReporter};

/// Loop position attached to results and continuations; zero outside loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct LoopPosition {
    pub iteration: usize,
    pub total: usize,
}

impl LoopPosition {
    pub const NONE: Self = Self { iteration: 0, total: 0 };
}

/// What the session should do next.
#[derive(Debug)]
pub(crate) enum Transition {
    Dispatch(DispatchRequest),
    Finished,
}

/// Result of handling one static step.
pub(crate) enum StepOutcome {
    Dispatch(DispatchRequest),
    Record(StepResult),
    EnterLoop,
}

/// Borrowed view of the session's collaborators for one transition.
pub(crate) struct Dispatcher<'a> {
    pub document: &'a RequestDocument,
    pub requests: &'a IndexMap<String, RequestDefinition>,
    pub evaluator: &'a dyn ConditionEvaluator,
    pub reporter: &'a dyn StatusReporter,
    pub next_token: &'a mut u64,
}

impl Dispatcher<'_> {
    /// Runs synchronous transitions until a request is dispatched or the run ends.
    pub fn advance(&mut self, run: &mut RunState) -> Transition {
        loop {
            if run.canceled {
                return Transition::Finished;
            }

            if run.loop_state.is_some() {
                match self.next_iteration(run) {
                    LoopStep::Dispatch(request) => return Transition::Dispatch(request),
                    LoopStep::Recorded { stop: true } => return Transition::Finished,
                    LoopStep::Recorded { stop: false } => continue,
                    LoopStep::Done => {
                        run.loop_state = None;
                        run.index += 1;
                        continue;
                    }
                }
            }

            let Some(step) = run.workflow.steps.get(run.index).cloned() else {
                return Transition::Finished;
            };
            run.current_branch = None;

            let outcome = match &step {
                WorkflowStep::Request(request_step) => self.request_step(run, request_step, None),
                WorkflowStep::ForEach(for_each) => self.request_step(run, &for_each.request, for_each.for_each.as_ref()),
                WorkflowStep::If(if_step) => self.if_step(run, if_step),
                WorkflowStep::Switch(switch_step) => self.switch_step(run, switch_step),
            };

            match outcome {
                StepOutcome::Dispatch(request) => return Transition::Dispatch(request),
                StepOutcome::EnterLoop => continue,
                StepOutcome::Record(result) => {
                    self.report_result(run, &result);
                    if run.record(result) {
                        return Transition::Finished;
                    }
                    run.index += 1;
                }
            }
        }
    }

    /// Consumes the outcome of the in-flight request and continues the run.
    pub fn resume(&mut self, run: &mut RunState, pending: PendingStep, outcome: RequestOutcome) -> Transition {
        let elapsed = pending.dispatched_at.elapsed();

        if run.canceled {
            run.canceled_at = Some(pending.step_index);
            let reason = run.cancel_reason.clone().unwrap_or_else(|| "canceled".to_string());
            let mut result = StepResult::new(pending.step_index, pending.label, StepStatus::Canceled, reason)
                .with_request(pending.request_name)
                .with_position(pending.iteration, pending.total)
                .with_branch(pending.branch);
            result.duration = elapsed;
            result.response = outcome.response;
            run.record(result);
            return Transition::Finished;
        }

        let expectations = match (&pending.branch, run.workflow.steps.get(pending.step_index)) {
            (None, Some(step)) => step.request_step().cloned(),
            _ => None,
        };
        let verdict = classify(&outcome, expectations.as_ref(), elapsed);
        let result = StepResult {
            step_index: pending.step_index,
            label: pending.label,
            request_name: Some(pending.request_name),
            status: verdict.status,
            status_text: verdict.status_text,
            duration: verdict.duration,
            message: verdict.message,
            iteration: pending.iteration,
            total: pending.total,
            branch: pending.branch,
            response: outcome.response,
            tests: outcome.tests,
            error: verdict.error,
        };
        self.report_result(run, &result);

        if run.record(result) {
            return Transition::Finished;
        }
        if run.loop_state.is_none() {
            run.index += 1;
        }
        self.advance(run)
    }

    pub(super) fn scope(
        &self,
        run: &RunState,
        request: Option<&RequestDefinition>,
        step: &IndexMap<String, String>,
        loop_vars: &IndexMap<String, String>,
    ) -> IndexMap<String, String> {
        let no_request_vars = IndexMap::new();
        scope::merge(
            &self.document.variables,
            request.map(|request| &request.variables).unwrap_or(&no_request_vars),
            &run.environment_vars,
            &run.vars,
            step,
            loop_vars,
        )
    }

    /// Applies step vars, merges scopes, and issues the request.
    ///
    /// Step vars are interpolated against the scope without them, written into
    /// workflow scope, and also passed as the step layer of this dispatch.
    pub(super) fn dispatch(
        &mut self,
        run: &mut RunState,
        request: &RequestDefinition,
        step_vars: &IndexMap<String, String>,
        loop_vars: &IndexMap<String, String>,
        position: LoopPosition,
    ) -> Result<DispatchRequest, StepResult> {
        let base = self.scope(run, Some(request), &IndexMap::new(), loop_vars);
        let step_layer = interpolate_map(step_vars, &base).map_err(|error| {
            failed_result(run, format!("step vars: {error}"), position).with_request(request.name.clone())
        })?;
        for (name, value) in &step_layer {
            run.vars.insert(name.clone(), value.clone());
        }
        let variables = self.scope(run, Some(request), &step_layer, loop_vars);

        let token = DispatchToken(*self.next_token);
        *self.next_token += 1;
        let label = step_label(run);
        run.current = Some(PendingStep {
            token,
            step_index: run.index,
            label: label.clone(),
            request_name: request.name.clone(),
            iteration: position.iteration,
            total: position.total,
            branch: run.current_branch.clone(),
            dispatched_at: Instant::now(),
        });

        let progress = if position.total > 0 {
            format!(" [{}/{}]", position.iteration, position.total)
        } else {
            String::new()
        };
        self.reporter.notify(
            &format!("step {}/{}: {}{} -> {} {}", run.index + 1, run.step_count(), label, progress, request.method, request.name),
            StatusLevel::Info,
        );
        debug!(token = %token, step = run.index, request = %request.name, "dispatching request");

        Ok(DispatchRequest {
            token,
            request: request.clone(),
            variables,
            environment: run.environment.clone(),
            step_index: run.index,
            step_label: label,
        })
    }

    fn request_step(&mut self, run: &mut RunState, step: &RequestStep, loop_spec: Option<&ForEachSpec>) -> StepOutcome {
        let requests = self.requests;
        let Some(request) = requests.get(step.using.trim()) else {
            return StepOutcome::Record(failed_result(run, format!("unknown request '{}'", step.using), LoopPosition::NONE));
        };

        // A loop evaluates the guard per item instead of once here.
        if let Some(spec) = loop_spec.or(request.for_each.as_ref()) {
            return self.enter_loop(run, request, spec);
        }

        let no_vars = IndexMap::new();
        if let Some(guard) = step.when.as_deref() {
            let scope = self.scope(run, Some(request), &no_vars, &no_vars);
            match evaluate_condition(self.evaluator, guard, &scope) {
                Ok(true) => {}
                Ok(false) => {
                    return StepOutcome::Record(
                        skipped_result(run, format!("condition `{guard}` is false"), LoopPosition::NONE).with_request(request.name.clone()),
                    );
                }
                Err(error) => {
                    return StepOutcome::Record(
                        failed_result(run, format!("when `{guard}`: {error}"), LoopPosition::NONE).with_request(request.name.clone()),
                    );
                }
            }
        }

        match self.dispatch(run, request, &step.vars, &no_vars, LoopPosition::NONE) {
            Ok(request) => StepOutcome::Dispatch(request),
            Err(result) => StepOutcome::Record(result),
        }
    }

    fn if_step(&mut self, run: &mut RunState, step: &IfStep) -> StepOutcome {
        let no_vars = IndexMap::new();
        let scope = self.scope(run, None, &no_vars, &no_vars);
        let mut selected: Option<(String, &BranchAction)> = None;

        if let Some(then) = &step.then {
            match evaluate_condition(self.evaluator, &then.condition, &scope) {
                Ok(true) => selected = Some(("then".to_string(), &then.action)),
                Ok(false) => {}
                Err(error) => {
                    let message = format!("@if condition `{}`: {error}", then.condition);
                    return StepOutcome::Record(failed_result(run, message, LoopPosition::NONE));
                }
            }
        }

        if selected.is_none() {
            for (position, elif) in step.elif.iter().enumerate() {
                match evaluate_condition(self.evaluator, &elif.condition, &scope) {
                    Ok(true) => {
                        selected = Some((format!("elif {}", position + 1), &elif.action));
                        break;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        let message = format!("@elif condition `{}`: {error}", elif.condition);
                        return StepOutcome::Record(failed_result(run, message, LoopPosition::NONE));
                    }
                }
            }
        }

        if selected.is_none()
            && let Some(otherwise) = &step.otherwise
        {
            selected = Some(("else".to_string(), otherwise));
        }

        match selected {
            Some((label, action)) => self.take_branch(run, label, action, &step.vars),
            None => StepOutcome::Record(skipped_result(run, "no @if branch matched", LoopPosition::NONE)),
        }
    }

    fn switch_step(&mut self, run: &mut RunState, step: &SwitchStep) -> StepOutcome {
        let no_vars = IndexMap::new();
        let scope = self.scope(run, None, &no_vars, &no_vars);
        let value = match self.evaluator.eval(&step.expression, &scope) {
            Ok(value) => value,
            Err(error) => {
                let message = format!("@switch `{}`: {error}", step.expression);
                return StepOutcome::Record(failed_result(run, message, LoopPosition::NONE));
            }
        };

        let mut selected: Option<(String, &BranchAction)> = None;
        for case in &step.cases {
            let candidate = match self.evaluator.eval(&case.value, &scope) {
                Ok(candidate) => candidate,
                Err(error) => {
                    let message = format!("@case `{}`: {error}", case.value);
                    return StepOutcome::Record(failed_result(run, message, LoopPosition::NONE));
                }
            };
            if values_equal(&value, &candidate) {
                selected = Some((format!("case {}", case.value.trim()), &case.action));
                break;
            }
        }

        if selected.is_none()
            && let Some(default) = &step.default
        {
            selected = Some(("default".to_string(), default));
        }

        match selected {
            Some((label, action)) => self.take_branch(run, label, action, &step.vars),
            None => StepOutcome::Record(skipped_result(run, "no @switch case matched", LoopPosition::NONE)),
        }
    }

    fn take_branch(&mut self, run: &mut RunState, label: String, action: &BranchAction, step_vars: &IndexMap<String, String>) -> StepOutcome {
        run.current_branch = Some(label.clone());
        match action.outcome() {
            BranchOutcome::Fail(message) => {
                let message = if message.trim().is_empty() {
                    format!("branch '{label}' forced a failure")
                } else {
                    message.to_string()
                };
                StepOutcome::Record(failed_result(run, message, LoopPosition::NONE))
            }
            BranchOutcome::Empty => StepOutcome::Record(failed_result(run, format!("branch '{label}' has no run target"), LoopPosition::NONE)),
            BranchOutcome::Run(target) => {
                let requests = self.requests;
                let Some(request) = requests.get(target) else {
                    let message = format!("branch '{label}' runs unknown request '{target}'");
                    return StepOutcome::Record(failed_result(run, message, LoopPosition::NONE));
                };
                match self.dispatch(run, request, step_vars, &IndexMap::new(), LoopPosition::NONE) {
                    Ok(request) => StepOutcome::Dispatch(request),
                    Err(result) => StepOutcome::Record(result),
                }
            }
        }
    }

    pub(super) fn report_result(&self, run: &RunState, result: &StepResult) {
        if result.status != StepStatus::Failed {
            return;
        }
        self.reporter.notify(
            &format!("step {}/{} {} failed: {}", result.step_index + 1, run.step_count(), result.label, result.message),
            StatusLevel::Warn,
        );
    }
}

/// Progress of an active loop after one iteration was handled.
pub(crate) enum LoopStep {
    Dispatch(DispatchRequest),
    Recorded { stop: bool },
    Done,
}

pub(super) fn step_label(run: &RunState) -> String {
    run.workflow.steps.get(run.index).map(WorkflowStep::label).unwrap_or_default()
}

pub(super) fn failed_result(run: &RunState, message: impl Into<String>, position: LoopPosition) -> StepResult {
    StepResult::failed(run.index, step_label(run), message)
        .with_position(position.iteration, position.total)
        .with_branch(run.current_branch.clone())
}

pub(super) fn skipped_result(run: &RunState, reason: impl Into<String>, position: LoopPosition) -> StepResult {
    StepResult::skipped(run.index, step_label(run), reason)
        .with_position(position.iteration, position.total)
        .with_branch(run.current_branch.clone())
}
