//! # Template Resolution and Expression Evaluation
//!
//! Conditions (`when`, `@if`/`@elif`, `@switch`/`@case`) and for-each item lists
//! are evaluated through the [`ConditionEvaluator`] collaborator. The default
//! implementation, [`TemplateEvaluator`], understands a deliberately small
//! language:
//!
//! - `{{name}}` templates, interpolated from the merged variable scope
//! - operands: quoted strings, numbers, `true`/`false`/`null`, JSON array
//!   literals, and variable names (`name` or `vars.name`)
//! - operators: `==`, `!=`, `&&`, `||`, leading `!`, and parentheses
//!
//! Precedence from loosest to tightest is `||`, `&&`, then `==`/`!=`, then
//! `!`. So `!flag == "x"` compares the negated flag; write `!(flag == "x")`
//! to negate the comparison.
//!
//! Text that is neither a literal nor an identifier is taken verbatim, so
//! item lists such as `a,b,c` evaluate to the string `"a,b,c"`.
//!
//! ```rust
//! use indexmap::IndexMap;
//! use reqterm_engine::resolve::{ConditionEvaluator, TemplateEvaluator, is_truthy};
//!
//! let mut vars = IndexMap::new();
//! vars.insert("env".to_string(), "prod".to_string());
//!
//! let value = TemplateEvaluator.eval("{{env}} == \"prod\" && !vars.debug", &vars);
//! assert!(value.is_err(), "debug is not defined");
//!
//! vars.insert("debug".to_string(), "false".to_string());
//! let value = TemplateEvaluator.eval("{{env}} == \"prod\" && !vars.debug", &vars).unwrap();
//! assert!(is_truthy(&value));
//! ```

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::EvaluationError;

/// Prefix accepted in front of variable names (`vars.token`).
const VARIABLE_PREFIX: &str = "vars.";

static TEMPLATE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("valid template pattern"));

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("valid identifier pattern"));

/// Evaluates expressions synchronously against a merged variable scope.
pub trait ConditionEvaluator: Send + Sync {
    fn eval(&self, expression: &str, vars: &IndexMap<String, String>) -> Result<Value, EvaluationError>;
}

/// Evaluates an expression and reduces it to a boolean.
pub fn evaluate_condition(
    evaluator: &dyn ConditionEvaluator,
    expression: &str,
    vars: &IndexMap<String, String>,
) -> Result<bool, EvaluationError> {
    evaluator.eval(expression, vars).map(|value| is_truthy(&value))
}

/// Default evaluator backed by `{{name}}` templates and a small operator set.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateEvaluator;

impl ConditionEvaluator for TemplateEvaluator {
    fn eval(&self, expression: &str, vars: &IndexMap<String, String>) -> Result<Value, EvaluationError> {
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(EvaluationError::new("expression is empty"));
        }
        evaluate_node(trimmed, vars)
    }
}

/// Replaces every `{{name}}` in `template` with its value from `vars`.
///
/// Unknown names are an error rather than an empty substitution.
pub fn interpolate(template: &str, vars: &IndexMap<String, String>) -> Result<String, EvaluationError> {
    let mut output = String::with_capacity(template.len());
    let mut last_end = 0usize;
    for captures in TEMPLATE_PATTERN.captures_iter(template) {
        let Some(whole) = captures.get(0) else { continue };
        let name = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        output.push_str(&template[last_end..whole.start()]);
        output.push_str(lookup_variable(name, vars)?);
        last_end = whole.end();
    }
    output.push_str(&template[last_end..]);
    Ok(output)
}

/// Interpolates every value of a map, preserving key order.
pub fn interpolate_map(
    values: &IndexMap<String, String>,
    vars: &IndexMap<String, String>,
) -> Result<IndexMap<String, String>, EvaluationError> {
    values
        .iter()
        .map(|(key, value)| Ok((key.clone(), interpolate(value, vars)?)))
        .collect()
}

/// Truthiness used by guards and branch conditions.
///
/// Strings are truthy unless empty, `false`, `0`, or `null`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => {
            let text = text.trim();
            !(text.is_empty() || text.eq_ignore_ascii_case("false") || text == "0" || text == "null")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Compares two evaluated values; mixed types fall back to their text form.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Null, Value::Null) => true,
        _ => value_to_string(left) == value_to_string(right),
    }
}

/// Formats a value for storage in a string variable scope.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Turns an evaluated for-each items expression into the loop's item list.
///
/// Accepts a JSON array, a string holding a JSON array, or a comma-separated
/// string. `null` and blank strings yield no items.
pub fn items_from_value(value: Value) -> Result<Vec<String>, EvaluationError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.iter().map(value_to_string).collect()),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(Vec::new());
            }
            if trimmed.starts_with('[') {
                let parsed: Value =
                    serde_json::from_str(trimmed).map_err(|error| EvaluationError::new(format!("items are not a valid JSON list: {error}")))?;
                return items_from_value(parsed);
            }
            Ok(trimmed
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect())
        }
        other => Err(EvaluationError::new(format!("items must evaluate to a list, got {other}"))),
    }
}

fn lookup_variable<'a>(name: &str, vars: &'a IndexMap<String, String>) -> Result<&'a str, EvaluationError> {
    let name = name.trim();
    vars.get(name)
        .or_else(|| name.strip_prefix(VARIABLE_PREFIX).and_then(|short| vars.get(short)))
        .map(String::as_str)
        .ok_or_else(|| EvaluationError::new(format!("unknown variable '{name}'")))
}

fn evaluate_node(expression: &str, vars: &IndexMap<String, String>) -> Result<Value, EvaluationError> {
    if let Some(parts) = split_expression(expression, "||")? {
        for part in parts {
            if is_truthy(&evaluate_node(part, vars)?) {
                return Ok(Value::Bool(true));
            }
        }
        return Ok(Value::Bool(false));
    }
    if let Some(parts) = split_expression(expression, "&&")? {
        for part in parts {
            if !is_truthy(&evaluate_node(part, vars)?) {
                return Ok(Value::Bool(false));
            }
        }
        return Ok(Value::Bool(true));
    }

    // Comparisons split before negation: `!a == b` reads as `(!a) == b`.
    let expression = expression.trim();
    for (operator, expect_equal) in [("!=", false), ("==", true)] {
        if let Some(position) = find_top_level_operator(expression, operator) {
            let left = expression[..position].trim();
            let right = expression[position + operator.len()..].trim();
            if left.is_empty() || right.is_empty() {
                return Err(EvaluationError::new(format!("'{operator}' needs a left and right operand")));
            }
            let equal = values_equal(&evaluate_node(left, vars)?, &evaluate_node(right, vars)?);
            return Ok(Value::Bool(equal == expect_equal));
        }
    }

    let (negations, inner) = strip_leading_negations(expression);
    let inner = inner.trim();
    if negations > 0 {
        if inner.is_empty() {
            return Err(EvaluationError::new("expression cannot end with a negation operator"));
        }
        let value = evaluate_node(inner, vars)?;
        return Ok(Value::Bool(is_truthy(&value) ^ (negations % 2 == 1)));
    }

    if let Some(grouped) = strip_wrapping_parentheses(inner) {
        return evaluate_node(grouped, vars);
    }

    resolve_operand(inner, vars)
}

fn resolve_operand(operand: &str, vars: &IndexMap<String, String>) -> Result<Value, EvaluationError> {
    let trimmed = operand.trim();
    if trimmed.is_empty() {
        return Err(EvaluationError::new("operand cannot be empty"));
    }

    if let Some(name) = whole_template(trimmed) {
        return lookup_variable(name, vars).map(|value| Value::String(value.to_string()));
    }

    if let Some(inner) = strip_quotes(trimmed) {
        return interpolate(inner, vars).map(Value::String);
    }

    if trimmed.starts_with('[') {
        let rendered = interpolate(trimmed, vars)?;
        return serde_json::from_str(&rendered).map_err(|error| EvaluationError::new(format!("invalid list literal '{trimmed}': {error}")));
    }

    match trimmed {
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    if looks_numeric(trimmed)
        && let Ok(number @ Value::Number(_)) = serde_json::from_str::<Value>(trimmed)
    {
        return Ok(number);
    }

    if IDENTIFIER_PATTERN.is_match(trimmed) {
        return lookup_variable(trimmed, vars).map(|value| Value::String(value.to_string()));
    }

    interpolate(trimmed, vars).map(Value::String)
}

fn whole_template(operand: &str) -> Option<&str> {
    let inner = operand.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn strip_quotes(operand: &str) -> Option<&str> {
    if operand.len() < 2 {
        return None;
    }
    ['"', '\''].into_iter().find_map(|quote| operand.strip_prefix(quote)?.strip_suffix(quote))
}

fn looks_numeric(operand: &str) -> bool {
    operand
        .chars()
        .next()
        .map(|character| character == '-' || character.is_ascii_digit())
        .unwrap_or(false)
}

fn strip_wrapping_parentheses(expression: &str) -> Option<&str> {
    let inner = expression.strip_prefix('(')?.strip_suffix(')')?;
    // "(a) == (b)" starts and ends with parentheses without being one group.
    let mut depth = 0i32;
    for character in inner.chars() {
        match character {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    (depth == 0).then_some(inner)
}

fn split_expression<'a>(expression: &'a str, operator: &str) -> Result<Option<Vec<&'a str>>, EvaluationError> {
    let mut parts = Vec::new();
    let mut start = 0usize;

    while let Some(relative_index) = find_top_level_operator(&expression[start..], operator) {
        let absolute_index = start + relative_index;
        parts.push(expression[start..absolute_index].trim());
        start = absolute_index + operator.len();
    }
    if parts.is_empty() {
        return Ok(None);
    }
    parts.push(expression[start..].trim());

    if parts.iter().any(|part| part.is_empty()) {
        return Err(EvaluationError::new(format!("'{operator}' needs an operand on both sides")));
    }
    Ok(Some(parts))
}

fn strip_leading_negations(expression: &str) -> (usize, &str) {
    let mut count = 0usize;
    let mut remainder = expression.trim_start();
    while let Some(stripped) = remainder.strip_prefix('!') {
        if stripped.starts_with('=') {
            break;
        }
        count += 1;
        remainder = stripped.trim_start();
    }
    (count, remainder)
}

fn find_top_level_operator(expression: &str, operator: &str) -> Option<usize> {
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut depth = 0i32;

    for (index, character) in expression.char_indices() {
        match character {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                continue;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                continue;
            }
            '(' | '[' | '{' if !in_single_quote && !in_double_quote => {
                depth += 1;
                continue;
            }
            ')' | ']' | '}' if !in_single_quote && !in_double_quote => {
                if depth > 0 {
                    depth -= 1;
                }
                continue;
            }
            _ => {}
        }

        if !in_single_quote && !in_double_quote && depth == 0 && expression[index..].starts_with(operator) {
            return Some(index);
        }
    }

    None
}
