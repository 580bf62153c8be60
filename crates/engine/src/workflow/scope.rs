//! Variable scope merging.

use indexmap::IndexMap;

/// Merges the variable layers visible to one step into a fresh map.
///
/// Later layers override earlier ones: document, request, environment,
/// workflow, step, then loop. Inputs are never mutated, so each dispatch gets
/// its own snapshot and loop iterations cannot leak into each other.
pub fn merge(
    document: &IndexMap<String, String>,
    request: &IndexMap<String, String>,
    environment: &IndexMap<String, String>,
    workflow: &IndexMap<String, String>,
    step: &IndexMap<String, String>,
    loop_vars: &IndexMap<String, String>,
) -> IndexMap<String, String> {
    let mut merged = IndexMap::with_capacity(document.len() + request.len() + environment.len() + workflow.len());
    for layer in [document, request, environment, workflow, step, loop_vars] {
        for (name, value) in layer {
            merged.insert(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn later_layers_win() {
        let merged = merge(
            &layer(&[("host", "doc"), ("only_doc", "1")]),
            &layer(&[("host", "request")]),
            &layer(&[("host", "env"), ("token", "env-token")]),
            &layer(&[("token", "workflow-token")]),
            &layer(&[("page", "1")]),
            &layer(&[("page", "2"), ("item", "a")]),
        );

        assert_eq!(merged["host"], "env");
        assert_eq!(merged["token"], "workflow-token");
        assert_eq!(merged["page"], "2");
        assert_eq!(merged["item"], "a");
        assert_eq!(merged["only_doc"], "1");
    }

    #[test]
    fn inputs_are_untouched() {
        let workflow = layer(&[("a", "1")]);
        let empty = IndexMap::new();
        let mut merged = merge(&empty, &empty, &empty, &workflow, &empty, &layer(&[("a", "2")]));
        merged.insert("b".into(), "3".into());
        assert_eq!(workflow, layer(&[("a", "1")]));
    }
}
