//! Turns a request outcome plus declared expectations into a verdict.

use std::time::Duration;

use reqterm_types::{RequestProtocol, RequestStep, ResponseSnapshot};

use crate::executor::RequestOutcome;
use crate::workflow::state::StepStatus;

/// Verdict for one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: StepStatus,
    pub status_text: String,
    pub message: String,
    pub duration: Duration,
    pub error: Option<String>,
}

impl Classification {
    fn new(status: StepStatus, status_text: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            message: message.into(),
            duration,
            error: None,
        }
    }

    fn failure(status_text: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        let message = message.into();
        Self {
            error: Some(message.clone()),
            ..Self::new(StepStatus::Failed, status_text, message, duration)
        }
    }
}

/// Classifies an outcome.
///
/// `expectations` is the request step's `expect` map owner; branch dispatches
/// pass `None` and get the default status rules. `elapsed` is the wall-clock
/// time since dispatch, used when the transport reports no duration.
pub fn classify(outcome: &RequestOutcome, expectations: Option<&RequestStep>, elapsed: Duration) -> Classification {
    if let Some(error) = &outcome.error {
        return Classification::failure("error", error.clone(), elapsed);
    }
    let Some(response) = &outcome.response else {
        return Classification::failure("error", "no response received", elapsed);
    };

    let duration = response.duration.unwrap_or(elapsed);
    let status_text = if response.status.trim().is_empty() {
        response.status_code.to_string()
    } else {
        response.status.clone()
    };
    let has_expectation = expectations.is_some_and(RequestStep::has_status_expectation);

    if !has_expectation && is_error_status(response) {
        return Classification::failure(status_text.clone(), format!("request failed with status {status_text}"), duration);
    }

    if let Some(script_error) = &outcome.script_error {
        return Classification::failure(status_text, format!("script error: {script_error}"), duration);
    }
    if let Some(test) = outcome.tests.iter().find(|test| !test.passed) {
        let message = match test.message.as_deref().filter(|message| !message.trim().is_empty()) {
            Some(detail) => format!("test '{}' failed: {detail}", test.name),
            None => format!("test '{}' failed", test.name),
        };
        return Classification::failure(status_text, message, duration);
    }

    if let Some(step) = expectations {
        if let Some(expected) = step.expected_status()
            && !status_matches(expected, response)
        {
            return Classification::failure(status_text.clone(), format!("expected status '{expected}', got '{status_text}'"), duration);
        }
        if let Some(expected) = step.expected_status_code() {
            let Ok(code) = expected.trim().parse::<u16>() else {
                return Classification::failure(status_text, format!("invalid expected status code '{expected}'"), duration);
            };
            if code != response.status_code {
                return Classification::failure(
                    status_text,
                    format!("expected status code {code}, got {}", response.status_code),
                    duration,
                );
            }
        }
    }

    let message = if outcome.tests.is_empty() {
        String::new()
    } else {
        format!("{} test(s) passed", outcome.tests.len())
    };
    Classification::new(StepStatus::Succeeded, status_text, message, duration)
}

fn is_error_status(response: &ResponseSnapshot) -> bool {
    match response.protocol {
        RequestProtocol::Grpc => response.status_code != 0,
        RequestProtocol::Http | RequestProtocol::Graphql => response.status_code >= 400,
    }
}

fn status_matches(expected: &str, response: &ResponseSnapshot) -> bool {
    response.status.trim().eq_ignore_ascii_case(expected.trim())
}
