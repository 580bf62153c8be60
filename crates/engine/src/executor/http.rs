//! reqwest-backed [`RequestExecutor`] for HTTP and GraphQL requests.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqterm_types::{RequestDefinition, RequestProtocol};
use reqterm_util::{HttpCall, build_http_client, execute_http_call};
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{DispatchRequest, RequestExecutor, RequestOutcome};
use crate::error::EvaluationError;
use crate::resolve::{interpolate, interpolate_map};

/// Sends requests over HTTP with a shared client.
#[derive(Debug, Clone)]
pub struct HttpRequestExecutor {
    client: Client,
}

impl HttpRequestExecutor {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }
}

#[async_trait]
impl RequestExecutor for HttpRequestExecutor {
    async fn dispatch(&self, request: DispatchRequest) -> RequestOutcome {
        if request.request.protocol == RequestProtocol::Grpc {
            return request.fail("grpc transport is not available");
        }

        let call = match build_call(&request) {
            Ok(call) => call,
            Err(error) => return request.fail(format!("failed to prepare request: {error}")),
        };
        debug!(step = request.step_index, token = %request.token, method = %call.method, "executing request");
        let executed = executed_definition(&request.request, &call);

        let outcome = match execute_http_call(&self.client, &call).await {
            Ok(mut response) => {
                response.protocol = request.request.protocol;
                request.respond(response)
            }
            Err(error) => request.fail(error.to_string()),
        };
        outcome.with_request(executed)
    }
}

/// The definition as sent: resolved url, headers, and body in place of templates.
fn executed_definition(template: &RequestDefinition, call: &HttpCall) -> RequestDefinition {
    RequestDefinition {
        method: call.method.clone(),
        url: call.url.clone(),
        headers: call.headers.clone(),
        body: call.body.clone(),
        ..template.clone()
    }
}

/// Interpolates url, headers, and body; GraphQL bodies become `{query, variables}`.
fn build_call(request: &DispatchRequest) -> Result<HttpCall, EvaluationError> {
    let definition = &request.request;
    let vars = &request.variables;
    let url = interpolate(&definition.url, vars)?;
    let mut headers = interpolate_map(&definition.headers, vars)?;
    let body = definition.body.as_deref().map(|body| interpolate(body, vars)).transpose()?;

    match definition.protocol {
        RequestProtocol::Graphql => {
            if !headers.keys().any(|name| name.eq_ignore_ascii_case("content-type")) {
                headers.insert("Content-Type".to_string(), "application/json".to_string());
            }
            let payload = json!({
                "query": body.unwrap_or_default(),
                "variables": Value::Object(Default::default()),
            });
            Ok(HttpCall {
                method: "POST".to_string(),
                url,
                headers,
                body: Some(payload.to_string()),
            })
        }
        RequestProtocol::Http | RequestProtocol::Grpc => Ok(HttpCall {
            method: definition.method.clone(),
            url,
            headers,
            body,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DispatchToken;
    use std::io::{Read, Write};

    fn dispatch(definition: RequestDefinition, vars: &[(&str, &str)]) -> DispatchRequest {
        DispatchRequest {
            token: DispatchToken(7),
            request: definition,
            variables: vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            environment: "dev".into(),
            step_index: 0,
            step_label: "step".into(),
        }
    }

    #[test]
    fn http_call_is_interpolated() {
        let mut definition = RequestDefinition::new("Get", "GET", "{{base}}/users/{{id}}");
        definition.headers.insert("Authorization".into(), "Bearer {{token}}".into());
        definition.body = Some("{\"id\": {{id}}}".into());
        let call = build_call(&dispatch(definition, &[("base", "http://localhost"), ("id", "3"), ("token", "t")])).unwrap();

        assert_eq!(call.url, "http://localhost/users/3");
        assert_eq!(call.headers["Authorization"], "Bearer t");
        assert_eq!(call.body.as_deref(), Some("{\"id\": 3}"));
        assert_eq!(call.method, "GET");
    }

    #[test]
    fn graphql_body_is_wrapped() {
        let mut definition = RequestDefinition::new("Search", "GET", "http://localhost/graphql");
        definition.protocol = RequestProtocol::Graphql;
        definition.body = Some("{ user(id: {{id}}) { name } }".into());
        let call = build_call(&dispatch(definition, &[("id", "9")])).unwrap();

        assert_eq!(call.method, "POST");
        assert_eq!(call.headers["Content-Type"], "application/json");
        let payload: Value = serde_json::from_str(call.body.as_deref().unwrap()).unwrap();
        assert_eq!(payload["query"], "{ user(id: 9) { name } }");
    }

    #[test]
    fn unknown_template_variable_fails_preparation() {
        let definition = RequestDefinition::new("Get", "GET", "{{missing}}/x");
        assert!(build_call(&dispatch(definition, &[])).is_err());
    }

    #[tokio::test]
    async fn grpc_requests_report_missing_transport() {
        let mut definition = RequestDefinition::new("Rpc", "Greeter/SayHello", "localhost:50051");
        definition.protocol = RequestProtocol::Grpc;
        let executor = HttpRequestExecutor::new(Duration::from_secs(1)).unwrap();
        let outcome = executor.dispatch(dispatch(definition, &[])).await;

        assert_eq!(outcome.token, DispatchToken(7));
        assert_eq!(outcome.error.as_deref(), Some("grpc transport is not available"));
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn outcome_carries_the_interpolated_request() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .unwrap();
        });

        let mut definition = RequestDefinition::new("Item", "GET", "{{base}}/items/{{id}}");
        definition.headers.insert("X-Item".into(), "{{id}}".into());
        let base = format!("http://{addr}");
        let executor = HttpRequestExecutor::new(Duration::from_secs(5)).unwrap();
        let outcome = executor.dispatch(dispatch(definition, &[("base", &base), ("id", "7")])).await;
        server.join().unwrap();

        assert_eq!(outcome.response.as_ref().map(|response| response.status_code), Some(200));
        assert_eq!(outcome.request.url, format!("{base}/items/7"));
        assert_eq!(outcome.request.headers["X-Item"], "7");
        assert_eq!(outcome.request.name, "Item");
    }

    #[tokio::test]
    async fn transport_errors_still_report_the_resolved_request() {
        let definition = RequestDefinition::new("Item", "GET", "{{base}}/items/{{id}}");
        let executor = HttpRequestExecutor::new(Duration::from_secs(1)).unwrap();
        let outcome = executor.dispatch(dispatch(definition, &[("base", "not a url"), ("id", "7")])).await;

        assert!(outcome.error.unwrap().contains("invalid request url"));
        assert_eq!(outcome.request.url, "not a url/items/7");
    }

    #[tokio::test]
    async fn preparation_errors_become_outcome_errors() {
        let definition = RequestDefinition::new("Get", "GET", "{{missing}}");
        let executor = HttpRequestExecutor::new(Duration::from_secs(1)).unwrap();
        let outcome = executor.dispatch(dispatch(definition, &[])).await;
        assert!(outcome.error.unwrap().contains("unknown variable 'missing'"));
    }
}
