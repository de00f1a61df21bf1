use axum::http::HeaderMap;
use serde::de::DeserializeOwned;

use crate::error::PaymentError;

// Client identity for rate limiting: first x-forwarded-for hop, then x-real-ip
pub fn client_identity(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    forwarded
        .or(real_ip)
        .unwrap_or("anonymous")
        .to_string()
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// Malformed bodies are client errors (400), not extractor rejections
pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, PaymentError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(PaymentError::Validation("request body is empty".into()));
    }
    serde_json::from_slice(body)
        .map_err(|e| PaymentError::Validation(format!("invalid request body: {}", e)))
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
