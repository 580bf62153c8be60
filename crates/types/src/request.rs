//! Request documents, request definitions, and the transport-facing outcome types.

use std::{path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{scalar_map, workflow::ForEachSpec, workflow::WorkflowDefinition};

/// Wire protocol a request is sent with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestProtocol {
    #[default]
    Http,
    Graphql,
    Grpc,
}

impl RequestProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Graphql => "graphql",
            Self::Grpc => "grpc",
        }
    }
}

/// A named request authored in a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestDefinition {
    /// Name referenced by workflow `using=` and branch `run=` targets.
    pub name: String,
    #[serde(default)]
    pub protocol: RequestProtocol,
    /// HTTP method, or the RPC method for gRPC requests.
    #[serde(default = "default_method")]
    pub method: String,
    /// Target URL (may contain `{{name}}` templates).
    pub url: String,
    #[serde(default, with = "scalar_map")]
    pub headers: IndexMap<String, String>,
    /// Raw request body (may contain `{{name}}` templates).
    #[serde(default)]
    pub body: Option<String>,
    /// Request-scoped variables.
    #[serde(default, rename = "vars", with = "scalar_map")]
    pub variables: IndexMap<String, String>,
    /// Request-level loop declared directly on the request.
    #[serde(default)]
    pub for_each: Option<ForEachSpec>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestDefinition {
    pub fn new(name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            protocol: RequestProtocol::Http,
            method: method.into(),
            url: url.into(),
            headers: IndexMap::new(),
            body: None,
            variables: IndexMap::new(),
            for_each: None,
        }
    }
}

/// A parsed request document: variables, environments, requests, and workflows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RequestDocument {
    /// File the document was loaded from, when known.
    #[serde(skip)]
    pub path: Option<PathBuf>,
    /// Document-scoped variables.
    #[serde(default, rename = "vars", with = "scalar_map")]
    pub variables: IndexMap<String, String>,
    /// Named environments, each a variable map.
    #[serde(default)]
    pub environments: IndexMap<String, IndexMap<String, String>>,
    #[serde(default)]
    pub requests: Vec<RequestDefinition>,
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

impl RequestDocument {
    /// Named requests keyed by name; later duplicates win.
    pub fn request_index(&self) -> IndexMap<String, RequestDefinition> {
        self.requests
            .iter()
            .map(|request| (request.name.clone(), request.clone()))
            .collect()
    }

    pub fn find_workflow(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.workflows.iter().find(|workflow| workflow.name == name)
    }

    pub fn find_request(&self, name: &str) -> Option<&RequestDefinition> {
        self.requests.iter().rev().find(|request| request.name == name)
    }

    /// Variables of the named environment; empty when it is not declared.
    pub fn environment_variables(&self, environment: &str) -> IndexMap<String, String> {
        self.environments.get(environment).cloned().unwrap_or_default()
    }
}

/// Captured response returned by a transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub protocol: RequestProtocol,
    /// Status line, for example `404 Not Found` or `NOT_FOUND`.
    pub status: String,
    /// Numeric status (HTTP status or gRPC code).
    pub status_code: u16,
    #[serde(default)]
    pub headers: IndexMap<String, String>,
    #[serde(default)]
    pub body: String,
    /// Transport-measured round trip, when reported.
    #[serde(default)]
    pub duration: Option<Duration>,
}

impl ResponseSnapshot {
    pub fn http(status_code: u16, status: impl Into<String>) -> Self {
        Self {
            protocol: RequestProtocol::Http,
            status: status.into(),
            status_code,
            headers: IndexMap::new(),
            body: String::new(),
            duration: None,
        }
    }
}

/// Result of one named test run by the scripting collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl TestResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}
