//! Shared HTTP plumbing for the real provider APIs

use super::{CloudError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::blocking::{Client, Response};
use std::time::Duration;

/// Everything except RFC 3986 unreserved characters
pub const QUERY_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Same as [`QUERY_ENCODE`] but keeps `/` so keys stay readable in paths
pub const PATH_ENCODE: &AsciiSet = &QUERY_ENCODE.remove(b'/');

/// Longest body excerpt carried into an error message
const BODY_EXCERPT: usize = 500;

pub fn encode_query(value: &str) -> String {
    utf8_percent_encode(value, QUERY_ENCODE).to_string()
}

pub fn encode_path(value: &str) -> String {
    utf8_percent_encode(value, PATH_ENCODE).to_string()
}

/// Blocking client with the connect/request timeouts every provider uses
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(timeout)
        .build()
        .map_err(|e| request_error("create HTTP client", e))
}

/// Wrap a reqwest failure as a transport error
pub fn request_error(operation: &str, err: reqwest::Error) -> CloudError {
    CloudError::Transport {
        operation: operation.to_string(),
        message: err.to_string(),
        source: Some(Box::new(err)),
    }
}

/// Turn a non-2xx response into a transport error carrying status and body
pub fn check_status(operation: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    Err(CloudError::transport(
        operation,
        format!("HTTP {}: {}", status, excerpt(&body)),
    ))
}

/// Read the body of a successful response as text
pub fn read_text(operation: &str, response: Response) -> Result<String> {
    response.text().map_err(|e| request_error(operation, e))
}

/// Response header as a string, quotes stripped (ETags come quoted)
pub fn header_value(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
}

pub fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() > BODY_EXCERPT {
        let mut end = BODY_EXCERPT;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &trimmed[..end])
    } else {
        trimmed.to_string()
    }
}
