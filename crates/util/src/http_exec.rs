//! HTTP execution helper shared by the engine's request executor.
//!
//! Builds a reqwest client with the reqterm user agent and turns a resolved
//! [`HttpCall`] into a [`ResponseSnapshot`]. Non-2xx statuses are returned as
//! snapshots; only transport failures become errors.

use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use indexmap::IndexMap;
use reqterm_types::{RequestProtocol, ResponseSnapshot};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use tracing::debug;
use url::Url;

/// A fully interpolated HTTP request ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpCall {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

/// Build the shared client used for every request in a run.
pub fn build_http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(30)))
        .user_agent(format!("reqterm/{}; {}", env!("CARGO_PKG_VERSION"), std::env::consts::OS))
        .build()
        .map_err(|e| anyhow!(e))
}

/// Send one request and capture its response.
pub async fn execute_http_call(client: &Client, call: &HttpCall) -> anyhow::Result<ResponseSnapshot> {
    let url = Url::parse(call.url.trim()).with_context(|| format!("invalid request url '{}'", call.url))?;
    let method = Method::from_str(&call.method.trim().to_uppercase()).map_err(|e| anyhow!("invalid method '{}': {e}", call.method))?;
    let headers = build_header_map(&call.headers)?;

    let mut builder = client.request(method.clone(), url.clone()).headers(headers);
    if let Some(body) = call.body.as_ref().filter(|body| !body.is_empty()) {
        builder = builder.body(body.clone());
    }

    debug!(method = %method, url = %url, "sending request");
    let started = Instant::now();
    let response = builder.send().await.map_err(|e| anyhow!("Network error: {}", e))?;
    let status = response.status();
    let response_headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();
    let body = response.text().await.map_err(|e| anyhow!("failed to read response body: {e}"))?;
    let elapsed = started.elapsed();
    debug!(status = status.as_u16(), elapsed_ms = elapsed.as_millis() as u64, "received response");

    Ok(ResponseSnapshot {
        protocol: RequestProtocol::Http,
        status: status_line(status),
        status_code: status.as_u16(),
        headers: response_headers,
        body,
        duration: Some(elapsed),
    })
}

fn build_header_map(headers: &IndexMap<String, String>) -> anyhow::Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| anyhow!("invalid header name '{name}': {e}"))?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|e| anyhow!("invalid value for header '{name}': {e}"))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn status_line(status: reqwest::StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_includes_reason() {
        assert_eq!(status_line(reqwest::StatusCode::NOT_FOUND), "404 Not Found");
        assert_eq!(status_line(reqwest::StatusCode::from_u16(599).unwrap()), "599");
    }

    #[test]
    fn rejects_invalid_header_names() {
        let mut headers = IndexMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(build_header_map(&headers).is_err());

        let mut headers = IndexMap::new();
        headers.insert("Accept".to_string(), " application/json ".to_string());
        let map = build_header_map(&headers).unwrap();
        assert_eq!(map.get("accept").unwrap(), "application/json");
    }

    #[tokio::test]
    async fn invalid_url_is_an_error_before_sending() {
        let client = build_http_client(Duration::from_secs(1)).unwrap();
        let call = HttpCall {
            method: "GET".into(),
            url: "not a url".into(),
            headers: IndexMap::new(),
            body: None,
        };
        let error = execute_http_call(&client, &call).await.unwrap_err();
        assert!(error.to_string().contains("invalid request url"));
    }

    #[tokio::test]
    async fn truncated_body_is_an_error() {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\npartial")
                .unwrap();
        });

        let client = build_http_client(Duration::from_secs(5)).unwrap();
        let call = HttpCall {
            method: "GET".into(),
            url: format!("http://{addr}/"),
            headers: IndexMap::new(),
            body: None,
        };
        let error = execute_http_call(&client, &call).await.unwrap_err();
        assert!(error.to_string().contains("failed to read response body"), "{error}");
        server.join().unwrap();
    }

    #[tokio::test]
    async fn invalid_method_is_an_error() {
        let client = build_http_client(Duration::from_secs(1)).unwrap();
        let call = HttpCall {
            method: "GE T".into(),
            url: "http://127.0.0.1:9/".into(),
            headers: IndexMap::new(),
            body: None,
        };
        assert!(execute_http_call(&client, &call).await.is_err());
    }
}
