//! Key-based third-party WHOIS HTTP APIs, used after RDAP and port 43 have failed.

pub mod whoapi;
pub mod whoisxml;

pub use whoapi::WhoApiSource;
pub use whoisxml::WhoisXmlSource;

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tokio::time::timeout;

use crate::error::{LookupError, Result};

/// GET a JSON document. Query parameters may carry credentials, so errors are
/// stripped of the request URL before they can reach logs or callers.
pub(crate) async fn fetch_json(
    client: &Client,
    source_name: &str,
    endpoint: &str,
    query: &[(&str, &str)],
    request_timeout: Duration,
) -> Result<Value> {
    let secs = request_timeout.as_secs();
    let request = client.get(endpoint).query(query).send();

    let response = timeout(request_timeout, request)
        .await
        .map_err(|_| LookupError::timeout(format!("{source_name} request"), secs))?
        .map_err(|e| LookupError::upstream(source_name, e.without_url().to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LookupError::http_status(source_name, status.as_u16()));
    }

    let body = timeout(request_timeout, response.text())
        .await
        .map_err(|_| LookupError::timeout(format!("{source_name} read"), secs))?
        .map_err(|e| LookupError::upstream(source_name, e.without_url().to_string()))?;

    if body.trim().is_empty() {
        return Err(LookupError::upstream(source_name, "empty response"));
    }

    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        LookupError::parse(format!("{source_name} returned invalid JSON: {e}"), Some(preview))
    })
}

/// Non-empty trimmed string at `key`; numbers are rendered as text
pub(crate) fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A string or list of strings at `key`, flattened to a list
pub(crate) fn text_list(value: &Value, key: &str) -> Vec<String> {
    value.get(key).map(strings).unwrap_or_default()
}

/// A string or list of strings, flattened to a list
pub(crate) fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
