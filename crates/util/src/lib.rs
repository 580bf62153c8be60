//! Utility helpers shared by the reqterm engine and CLI: run history
//! persistence, user settings, HTTP execution, and text redaction.

use once_cell::sync::Lazy;
use regex::Regex;

pub mod history_store;
pub mod http_exec;
pub mod path_processing;
pub mod settings;

pub use history_store::{HistoryStoreError, InMemoryRunHistory, JsonRunHistory, RunHistoryStore};
pub use http_exec::{HttpCall, build_http_client, execute_http_call};
pub use path_processing::expand_tilde;
pub use settings::{SettingsError, UserSettings};

static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+ ]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)=)([^\s&]+)",
        r"(?i)(DATABASE_URL=)([^\s]+)",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in REDACT_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_tokens_and_authorization_headers() {
        let text = "GET /users?API_TOKEN=abc123&page=2\nAuthorization: Bearer xyz";
        let redacted = redact_sensitive(text);
        assert!(redacted.contains("API_TOKEN=<redacted>"));
        assert!(redacted.contains("&page=2"));
        assert!(redacted.contains("Authorization: <redacted>"));
        assert!(!redacted.contains("xyz"));
    }

    #[test]
    fn leaves_plain_text_alone() {
        assert_eq!(redact_sensitive("status 200 OK"), "status 200 OK");
    }
}
