//! Shared type definitions for reqterm: request documents, workflow definitions,
//! transport outcomes, and history entries.

pub mod history;
pub mod request;
pub mod workflow;

pub use history::{RunOutcome, WorkflowHistoryEntry};
pub use request::{RequestDefinition, RequestDocument, RequestProtocol, ResponseSnapshot, TestResult};
pub use workflow::{
    BranchAction, BranchOutcome, CaseBranch, ConditionalBranch, ForEachSpec, ForEachStep, IfStep, OnFailurePolicy, RequestStep,
    SwitchStep, WorkflowDefinition, WorkflowStep,
};

/// Serde helpers for string maps authored with scalar values.
///
/// YAML authors write `statuscode: 200` or `retries: 3`; these are stored as
/// strings so option and variable maps stay uniform.
pub(crate) mod scalar_map {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(map: &IndexMap<String, String>, serializer: S) -> Result<S::Ok, S::Error> {
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<IndexMap<String, String>, D::Error> {
        let raw = Option::<IndexMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
        raw.into_iter()
            .map(|(key, value)| match value {
                Value::String(text) => Ok((key, text)),
                Value::Null => Ok((key, String::new())),
                Value::Bool(_) | Value::Number(_) => Ok((key, value.to_string())),
                Value::Array(_) | Value::Object(_) => Err(D::Error::custom(format!("value for '{key}' must be a scalar"))),
            })
            .collect()
    }
}
