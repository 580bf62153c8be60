//! Renders a workflow back into its directive-comment form.
//!
//! The output is stored with history entries so a run can be audited or
//! replayed against the exact definition that produced it.

use indexmap::IndexMap;
use reqterm_types::{BranchAction, OnFailurePolicy, RequestDefinition, RequestStep, WorkflowDefinition, WorkflowStep};

/// Reconstructs the directive-comment text for `workflow`.
///
/// Request steps are followed by the `METHOD url` line of their target when
/// the request is known.
pub fn render_definition(workflow: &WorkflowDefinition, requests: &IndexMap<String, RequestDefinition>) -> String {
    let mut lines = vec![format!("# @workflow {}", workflow.name)];
    if let Some(description) = workflow.description.as_deref().filter(|text| !text.trim().is_empty()) {
        lines.push(format!("# @description {}", description.trim()));
    }
    if !workflow.tags.is_empty() {
        lines.push(format!("# @tags {}", workflow.tags.join(", ")));
    }
    if workflow.default_on_failure != OnFailurePolicy::Stop {
        lines.push(format!("# @on-failure {}", workflow.default_on_failure.as_str()));
    }
    for (key, value) in &workflow.options {
        lines.push(format!("# @option {key}={}", quote(value)));
    }

    for step in &workflow.steps {
        lines.push(String::new());
        match step {
            WorkflowStep::Request(request_step) => render_request_step(&mut lines, request_step, requests),
            WorkflowStep::ForEach(for_each) => {
                if let Some(spec) = &for_each.for_each {
                    lines.push(format!("# @for-each items={} as={}", quote(&spec.items), spec.var));
                }
                render_request_step(&mut lines, &for_each.request, requests);
            }
            WorkflowStep::If(if_step) => {
                let mut header = "# @if".to_string();
                if let Some(then) = &if_step.then {
                    header.push_str(&format!(" cond={}{}", quote(&then.condition), action(&then.action)));
                }
                push_common(&mut header, if_step.name.as_deref(), if_step.on_failure);
                lines.push(header);
                push_vars(&mut lines, &if_step.vars);
                for elif in &if_step.elif {
                    lines.push(format!("# @elif cond={}{}", quote(&elif.condition), action(&elif.action)));
                }
                if let Some(otherwise) = &if_step.otherwise {
                    lines.push(format!("# @else{}", action(otherwise)));
                }
            }
            WorkflowStep::Switch(switch_step) => {
                let mut header = format!("# @switch {}", quote(&switch_step.expression));
                push_common(&mut header, switch_step.name.as_deref(), switch_step.on_failure);
                lines.push(header);
                push_vars(&mut lines, &switch_step.vars);
                for case in &switch_step.cases {
                    lines.push(format!("# @case {}{}", quote(&case.value), action(&case.action)));
                }
                if let Some(default) = &switch_step.default {
                    lines.push(format!("# @default{}", action(default)));
                }
            }
        }
    }

    lines.join("\n")
}

fn render_request_step(lines: &mut Vec<String>, step: &RequestStep, requests: &IndexMap<String, RequestDefinition>) {
    let mut header = format!("# @step using={}", quote(&step.using));
    if let Some(guard) = &step.when {
        header.push_str(&format!(" when={}", quote(guard)));
    }
    push_common(&mut header, step.name.as_deref(), step.on_failure);
    lines.push(header);
    push_vars(lines, &step.vars);
    if !step.expect.is_empty() {
        let pairs: Vec<String> = step.expect.iter().map(|(key, value)| format!("{key}={}", quote(value))).collect();
        lines.push(format!("# @expect {}", pairs.join(" ")));
    }
    if let Some(request) = requests.get(step.using.trim()) {
        lines.push(format!("{} {}", request.method, request.url));
    }
}

fn push_common(header: &mut String, name: Option<&str>, on_failure: Option<OnFailurePolicy>) {
    if let Some(name) = name.filter(|name| !name.trim().is_empty()) {
        header.push_str(&format!(" name={}", quote(name)));
    }
    if let Some(policy) = on_failure {
        header.push_str(&format!(" on-failure={}", policy.as_str()));
    }
}

fn push_vars(lines: &mut Vec<String>, vars: &IndexMap<String, String>) {
    if vars.is_empty() {
        return;
    }
    let pairs: Vec<String> = vars.iter().map(|(key, value)| format!("{key}={}", quote(value))).collect();
    lines.push(format!("# @vars {}", pairs.join(" ")));
}

fn action(action: &BranchAction) -> String {
    let mut text = String::new();
    if let Some(target) = &action.run {
        text.push_str(&format!(" run={}", quote(target)));
    }
    if let Some(message) = &action.fail {
        text.push_str(&format!(" fail={}", quote(message)));
    }
    text
}

fn quote(value: &str) -> String {
    let bare = !value.is_empty() && !value.chars().any(|ch| ch.is_whitespace() || matches!(ch, '"' | '=' | '#'));
    if bare {
        value.to_string()
    } else {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqterm_types::{CaseBranch, ConditionalBranch, ForEachSpec, ForEachStep, IfStep, SwitchStep};

    fn requests() -> IndexMap<String, RequestDefinition> {
        let mut requests = IndexMap::new();
        requests.insert("login".to_string(), RequestDefinition::new("login", "POST", "{{base}}/login"));
        requests.insert("items".to_string(), RequestDefinition::new("items", "GET", "{{base}}/items/{{id}}"));
        requests
    }

    #[test]
    fn renders_every_step_kind() {
        let mut expect = IndexMap::new();
        expect.insert("statuscode".to_string(), "200".to_string());
        let workflow = WorkflowDefinition {
            name: "checkout".into(),
            description: Some("Buy things".into()),
            tags: vec!["smoke".into(), "cart".into()],
            default_on_failure: OnFailurePolicy::Continue,
            steps: vec![
                WorkflowStep::Request(RequestStep {
                    using: "login".into(),
                    when: Some("{{user}} != \"\"".into()),
                    expect,
                    ..RequestStep::default()
                }),
                WorkflowStep::ForEach(ForEachStep {
                    request: RequestStep {
                        using: "items".into(),
                        ..RequestStep::default()
                    },
                    for_each: Some(ForEachSpec {
                        items: "[\"a\", \"b\"]".into(),
                        var: "id".into(),
                    }),
                }),
                WorkflowStep::If(IfStep {
                    then: Some(ConditionalBranch {
                        condition: "ready".into(),
                        action: BranchAction::run("login"),
                    }),
                    otherwise: Some(BranchAction::fail("not ready")),
                    ..IfStep::default()
                }),
                WorkflowStep::Switch(SwitchStep {
                    expression: "region".into(),
                    cases: vec![CaseBranch {
                        value: "\"eu\"".into(),
                        action: BranchAction::run("items"),
                    }],
                    default: Some(BranchAction::fail("unknown region")),
                    ..SwitchStep::default()
                }),
            ],
            ..WorkflowDefinition::default()
        };

        let text = render_definition(&workflow, &requests());
        assert!(text.starts_with("# @workflow checkout\n# @description Buy things\n# @tags smoke, cart\n# @on-failure continue"));
        assert!(text.contains("# @step using=login when=\"{{user}} != \\\"\\\"\"\n# @expect statuscode=200\nPOST {{base}}/login"));
        assert!(text.contains("# @for-each items=\"[\\\"a\\\", \\\"b\\\"]\" as=id\n# @step using=items\nGET {{base}}/items/{{id}}"));
        assert!(text.contains("# @if cond=ready run=login\n# @else fail=\"not ready\""));
        assert!(text.contains("# @switch region\n# @case \"\\\"eu\\\"\" run=items\n# @default fail=\"unknown region\""));
    }
}
