//! JSON API batch requests (`multipart/mixed`)
//!
//! Each part of a batch request wraps one embedded HTTP request. The response
//! mirrors it: one embedded HTTP response per part, matched back to the request
//! through `Content-ID`.

use crate::cloud::http::QUERY_ENCODE;
use percent_encoding::utf8_percent_encode;

/// Status of one embedded response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartResponse {
    /// 0-based index of the request this answers
    pub index: usize,
    pub status: u16,
    pub reason: String,
}

impl PartResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Body of a batch of `DELETE` object requests
pub fn delete_request_body(bucket: &str, keys: &[String], boundary: &str) -> String {
    let mut body = String::new();
    for (index, key) in keys.iter().enumerate() {
        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str("Content-Type: application/http\r\n");
        body.push_str(&format!("Content-ID: <{}>\r\n\r\n", index + 1));
        body.push_str(&format!(
            "DELETE /storage/v1/b/{}/o/{} HTTP/1.1\r\n\r\n",
            utf8_percent_encode(bucket, QUERY_ENCODE),
            utf8_percent_encode(key, QUERY_ENCODE)
        ));
    }
    body.push_str(&format!("--{}--\r\n", boundary));
    body
}

/// Boundary parameter of a `multipart/mixed` content type
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').map(str::trim).find_map(|param| {
        param
            .strip_prefix("boundary=")
            .map(|b| b.trim_matches('"').to_string())
    })
}

/// Parse a batch response into per-part statuses
///
/// Parts without a usable `Content-ID` are matched by position.
pub fn parse_response(body: &str, boundary: &str) -> Vec<PartResponse> {
    let delimiter = format!("--{}", boundary);
    let mut responses = Vec::new();

    for (position, part) in body
        .split(delimiter.as_str())
        .skip(1)
        .filter(|p| !p.starts_with("--"))
        .enumerate()
    {
        let mut index = position;
        let mut status = None;

        for line in part.lines().map(str::trim) {
            if let Some(value) = strip_header(line, "content-id:") {
                if let Some(n) = content_id_index(value) {
                    index = n;
                }
            } else if line.starts_with("HTTP/") && status.is_none() {
                let mut fields = line.splitn(3, ' ');
                fields.next();
                let code = fields.next().and_then(|c| c.parse::<u16>().ok());
                let reason = fields.next().unwrap_or_default().to_string();
                status = code.map(|c| (c, reason));
            }
        }

        if let Some((code, reason)) = status {
            responses.push(PartResponse {
                index,
                status: code,
                reason,
            });
        }
    }

    responses
}

fn strip_header<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    if line.len() >= name.len() && line[..name.len()].eq_ignore_ascii_case(name) {
        Some(line[name.len()..].trim())
    } else {
        None
    }
}

/// `<response-3>` -> 2
fn content_id_index(value: &str) -> Option<usize> {
    let inner = value.trim_start_matches('<').trim_end_matches('>');
    let number = inner.rsplit('-').next()?;
    number.parse::<usize>().ok()?.checked_sub(1)
}
