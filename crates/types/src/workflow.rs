//! Strongly typed workflow schema definitions shared across the engine and CLI.
//!
//! The models mirror the directive authoring form (`# @workflow`, `# @step`,
//! `# @if`, `# @switch`, `# @for-each`) after the document parser has turned it
//! into structured data. Steps preserve authoring order and option maps use
//! `IndexMap` so reconstructed definitions render predictably.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::scalar_map;

/// Prefix marking workflow options that seed workflow-scoped variables.
pub const WORKFLOW_VARIABLE_PREFIX: &str = "vars.";

/// Expectation key comparing the response status line.
pub const EXPECT_STATUS: &str = "status";

/// Expectation key comparing the numeric response status code.
pub const EXPECT_STATUS_CODE: &str = "statuscode";

/// Describes a fully authored workflow: metadata, defaults, and ordered steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowDefinition {
    /// Workflow name used for lookups, history, and summaries.
    pub name: String,
    /// Optional descriptive copy.
    #[serde(default)]
    pub description: Option<String>,
    /// Free-form tags declared on the workflow.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Failure policy applied to steps that do not declare their own.
    #[serde(default, rename = "on_failure")]
    pub default_on_failure: OnFailurePolicy,
    /// Workflow-level options. Keys prefixed with `vars.` seed workflow variables.
    #[serde(default, with = "scalar_map")]
    pub options: IndexMap<String, String>,
    /// Ordered steps executed sequentially.
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Returns the workflow-scoped variables declared through `vars.*` options.
    pub fn initial_variables(&self) -> IndexMap<String, String> {
        self.options
            .iter()
            .filter_map(|(key, value)| {
                key.strip_prefix(WORKFLOW_VARIABLE_PREFIX)
                    .filter(|name| !name.is_empty())
                    .map(|name| (name.to_string(), value.clone()))
            })
            .collect()
    }

    /// Resolves the effective failure policy for a step.
    pub fn policy_for(&self, step: &WorkflowStep) -> OnFailurePolicy {
        step.on_failure().unwrap_or(self.default_on_failure)
    }
}

/// Governs whether a failing step halts the run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFailurePolicy {
    /// Halt at the first non-skipped failure.
    #[default]
    Stop,
    /// Record the failure and move on to the next step.
    Continue,
}

impl OnFailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Continue => "continue",
        }
    }
}

/// A single unit of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Executes a named request.
    Request(RequestStep),
    /// Chooses a branch from ordered conditions.
    If(IfStep),
    /// Chooses a branch by comparing one expression against case values.
    Switch(SwitchStep),
    /// Runs a named request once per item of an evaluated list.
    ForEach(ForEachStep),
}

impl WorkflowStep {
    /// Display name declared by the author, if any.
    pub fn name(&self) -> Option<&str> {
        let name = match self {
            Self::Request(step) => step.name.as_deref(),
            Self::If(step) => step.name.as_deref(),
            Self::Switch(step) => step.name.as_deref(),
            Self::ForEach(step) => step.request.name.as_deref(),
        };
        name.filter(|value| !value.trim().is_empty())
    }

    /// Human-readable label: the declared name, the target request, or the step kind.
    pub fn label(&self) -> String {
        if let Some(name) = self.name() {
            return name.to_string();
        }
        match self {
            Self::Request(step) if !step.using.is_empty() => step.using.clone(),
            Self::ForEach(step) if !step.request.using.is_empty() => step.request.using.clone(),
            other => format!("@{}", other.kind_name()),
        }
    }

    /// Directive keyword for the step kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Request(_) => "step",
            Self::If(_) => "if",
            Self::Switch(_) => "switch",
            Self::ForEach(_) => "for-each",
        }
    }

    /// Step-level failure policy override.
    pub fn on_failure(&self) -> Option<OnFailurePolicy> {
        match self {
            Self::Request(step) => step.on_failure,
            Self::If(step) => step.on_failure,
            Self::Switch(step) => step.on_failure,
            Self::ForEach(step) => step.request.on_failure,
        }
    }

    /// Variable assignments declared on the step.
    pub fn vars(&self) -> &IndexMap<String, String> {
        match self {
            Self::Request(step) => &step.vars,
            Self::If(step) => &step.vars,
            Self::Switch(step) => &step.vars,
            Self::ForEach(step) => &step.request.vars,
        }
    }

    /// The request-shaped part of request and for-each steps.
    pub fn request_step(&self) -> Option<&RequestStep> {
        match self {
            Self::Request(step) => Some(step),
            Self::ForEach(step) => Some(&step.request),
            Self::If(_) | Self::Switch(_) => None,
        }
    }
}

/// Executes the request named by `using`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequestStep {
    #[serde(default)]
    pub name: Option<String>,
    /// Name of the request to execute.
    #[serde(default)]
    pub using: String,
    /// Guard expression; a false result skips the step.
    #[serde(default)]
    pub when: Option<String>,
    /// Variable assignments applied when the step dispatches.
    #[serde(default, with = "scalar_map")]
    pub vars: IndexMap<String, String>,
    /// Response expectations (`status`, `statuscode`).
    #[serde(default, with = "scalar_map")]
    pub expect: IndexMap<String, String>,
    #[serde(default)]
    pub on_failure: Option<OnFailurePolicy>,
}

impl RequestStep {
    /// Expected status line, when declared.
    pub fn expected_status(&self) -> Option<&str> {
        self.expect.get(EXPECT_STATUS).map(String::as_str)
    }

    /// Expected status code text, when declared.
    pub fn expected_status_code(&self) -> Option<&str> {
        self.expect.get(EXPECT_STATUS_CODE).map(String::as_str)
    }

    /// Returns `true` when an explicit status expectation overrides default classification.
    pub fn has_status_expectation(&self) -> bool {
        self.expected_status().is_some() || self.expected_status_code().is_some()
    }
}

/// A request step repeated over an item list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ForEachStep {
    #[serde(flatten)]
    pub request: RequestStep,
    /// Loop specification; required, checked by validation.
    #[serde(default)]
    pub for_each: Option<ForEachSpec>,
}

/// Item list expression plus the variable each item is bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForEachSpec {
    /// Expression producing the items.
    pub items: String,
    /// Variable name receiving the current item.
    #[serde(rename = "as", default = "default_loop_variable")]
    pub var: String,
}

fn default_loop_variable() -> String {
    "item".to_string()
}

/// What a matched branch does: run a request or force a failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BranchAction {
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub fail: Option<String>,
}

/// Interpreted form of a [`BranchAction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome<'a> {
    /// Dispatch the named request.
    Run(&'a str),
    /// Fail the step with the message.
    Fail(&'a str),
    /// Neither a target nor a failure message was declared.
    Empty,
}

impl BranchAction {
    pub fn run(target: impl Into<String>) -> Self {
        Self {
            run: Some(target.into()),
            fail: None,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            run: None,
            fail: Some(message.into()),
        }
    }

    /// Interprets the action. A `fail` message takes precedence over `run`.
    pub fn outcome(&self) -> BranchOutcome<'_> {
        if let Some(message) = self.fail.as_deref() {
            return BranchOutcome::Fail(message);
        }
        match self.run.as_deref().map(str::trim) {
            Some(target) if !target.is_empty() => BranchOutcome::Run(target),
            _ => BranchOutcome::Empty,
        }
    }

    /// Non-empty run target, if any.
    pub fn run_target(&self) -> Option<&str> {
        self.run.as_deref().map(str::trim).filter(|target| !target.is_empty())
    }
}

/// A branch guarded by a condition (`then`/`elif`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConditionalBranch {
    #[serde(rename = "cond")]
    pub condition: String,
    #[serde(flatten)]
    pub action: BranchAction,
}

/// Conditional step with ordered branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct IfStep {
    #[serde(default)]
    pub name: Option<String>,
    /// Primary branch; required, checked by validation.
    #[serde(default)]
    pub then: Option<ConditionalBranch>,
    #[serde(default)]
    pub elif: Vec<ConditionalBranch>,
    #[serde(default, rename = "else")]
    pub otherwise: Option<BranchAction>,
    #[serde(default, with = "scalar_map")]
    pub vars: IndexMap<String, String>,
    #[serde(default)]
    pub on_failure: Option<OnFailurePolicy>,
}

/// One `case` of a switch step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaseBranch {
    #[serde(rename = "case")]
    pub value: String,
    #[serde(flatten)]
    pub action: BranchAction,
}

/// Switch step comparing one expression against ordered cases.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SwitchStep {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "switch")]
    pub expression: String,
    #[serde(default)]
    pub cases: Vec<CaseBranch>,
    #[serde(default)]
    pub default: Option<BranchAction>,
    #[serde(default, with = "scalar_map")]
    pub vars: IndexMap<String, String>,
    #[serde(default)]
    pub on_failure: Option<OnFailurePolicy>,
}
