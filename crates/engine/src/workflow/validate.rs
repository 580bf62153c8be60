//! Definition checks run once before a workflow starts.

use indexmap::IndexMap;
use reqterm_types::{BranchAction, RequestDefinition, RequestStep, WorkflowDefinition, WorkflowStep};

use crate::error::ValidationError;

/// Validates a workflow against the named requests it may reference.
///
/// Fails fast on the first problem; the error names the workflow and the
/// 1-based step index.
pub fn validate_workflow(workflow: &WorkflowDefinition, requests: &IndexMap<String, RequestDefinition>) -> Result<(), ValidationError> {
    if workflow.steps.is_empty() {
        return Err(ValidationError::NoSteps {
            workflow: workflow.name.clone(),
        });
    }

    for (index, step) in workflow.steps.iter().enumerate() {
        check_step(step, requests).map_err(|reason| ValidationError::Step {
            workflow: workflow.name.clone(),
            step: index + 1,
            reason,
        })?;
    }
    Ok(())
}

fn check_step(step: &WorkflowStep, requests: &IndexMap<String, RequestDefinition>) -> Result<(), String> {
    match step {
        WorkflowStep::Request(request_step) => check_using(request_step, requests),
        WorkflowStep::ForEach(for_each) => {
            check_using(&for_each.request, requests)?;
            let spec = for_each
                .for_each
                .as_ref()
                .ok_or_else(|| "@for-each step is missing its loop spec".to_string())?;
            if spec.items.trim().is_empty() {
                return Err("@for-each items expression is empty".into());
            }
            if spec.var.trim().is_empty() {
                return Err("@for-each loop variable name is empty".into());
            }
            Ok(())
        }
        WorkflowStep::If(if_step) => {
            let then = if_step
                .then
                .as_ref()
                .ok_or_else(|| "@if step has no primary branch".to_string())?;
            if then.condition.trim().is_empty() {
                return Err("@if condition is empty".into());
            }
            check_branch("@if", &then.action, requests)?;
            for elif in &if_step.elif {
                if elif.condition.trim().is_empty() {
                    return Err("@elif condition is empty".into());
                }
                check_branch("@elif", &elif.action, requests)?;
            }
            if let Some(otherwise) = &if_step.otherwise {
                check_branch("@else", otherwise, requests)?;
            }
            Ok(())
        }
        WorkflowStep::Switch(switch_step) => {
            if switch_step.expression.trim().is_empty() {
                return Err("@switch expression is empty".into());
            }
            if switch_step.cases.is_empty() {
                return Err("@switch step has no cases".into());
            }
            for case in &switch_step.cases {
                check_branch("@case", &case.action, requests)?;
            }
            if let Some(default) = &switch_step.default {
                check_branch("@default", default, requests)?;
            }
            Ok(())
        }
    }
}

fn check_using(step: &RequestStep, requests: &IndexMap<String, RequestDefinition>) -> Result<(), String> {
    let using = step.using.trim();
    if using.is_empty() {
        return Err("step does not name a request (using=)".into());
    }
    if !requests.contains_key(using) {
        return Err(format!("unknown request '{using}'"));
    }
    Ok(())
}

fn check_branch(directive: &str, action: &BranchAction, requests: &IndexMap<String, RequestDefinition>) -> Result<(), String> {
    if action.fail.is_some() && action.run_target().is_some() {
        return Err(format!("{directive} branch declares both run= and fail="));
    }
    match action.run_target() {
        Some(target) if !requests.contains_key(target) => Err(format!("{directive} branch runs unknown request '{target}'")),
        _ => Ok(()),
    }
}
