//! Per-request view handed to interceptors, validators and handlers.
//!
//! Mirrors what the HTTP layer exposes: path segment parameters, query
//! string, cookies, parsed JSON body and the XHR flag, plus the request
//! UUID used to trace a request through the logs.

use std::collections::BTreeMap;

use axum::body::Body;
use axum::extract::{RawPathParams, Request};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::isolation::FailureDomain;

/// True when the client signaled a programmatic request.
pub fn is_xhr(headers: &HeaderMap) -> bool {
    headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
}

pub struct RequestContext {
    pub request_id: Uuid,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Named parameters from URI segments.
    pub params: BTreeMap<String, String>,
    /// Query string pairs; on repeated keys the last value wins.
    pub query: BTreeMap<String, String>,
    /// Cookie-header name/value pairs.
    pub cookies: BTreeMap<String, String>,
    /// Parsed JSON body, `Value::Null` when absent or not JSON.
    pub body: Value,
    pub xhr: bool,
    /// The failure domain this request executes in.
    pub domain: FailureDomain,
}

impl RequestContext {
    pub(crate) async fn assemble(
        params: RawPathParams,
        request: Request,
        domain: FailureDomain,
    ) -> Result<Self, Response> {
        let (parts, body) = request.into_parts();

        let params = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let query = parse_query(parts.uri.query().unwrap_or_default());
        let cookies = parse_cookies(&parts.headers);
        let xhr = is_xhr(&parts.headers);
        let body = read_json_body(&parts.headers, body).await?;

        Ok(Self {
            request_id: domain.request_id(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            params,
            query,
            cookies,
            body,
            xhr,
            domain,
        })
    }

    /// The single object validation schemas are evaluated against.
    pub fn validation_subject(&self) -> Value {
        json!({
            "params": self.params,
            "query": self.query,
            "cookies": self.cookies,
            "body": self.body,
        })
    }
}

fn parse_query(raw: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn parse_cookies(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut cookies = BTreeMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                cookies.insert(name.trim().to_string(), value.trim().to_string());
            }
        }
    }
    cookies
}

async fn read_json_body(headers: &HeaderMap, body: Body) -> Result<Value, Response> {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.map_err(|error| {
        tracing::debug!(error = %error, "failed to read request body");
        (StatusCode::BAD_REQUEST, "Malformed request body.").into_response()
    })?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"));
    if !is_json {
        return Ok(Value::Null);
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(value),
        Err(error) => {
            tracing::debug!(error = %error, "request body is not well-formed JSON");
            Err((StatusCode::BAD_REQUEST, "Malformed request body.").into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn query_pairs_last_value_wins() {
        let query = parse_query("id=1&name=a%20b&id=2");
        assert_eq!(query.get("id").map(String::as_str), Some("2"));
        assert_eq!(query.get("name").map(String::as_str), Some("a b"));
    }

    #[test]
    fn cookie_header_is_split_into_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("session=abc123; theme=dark"),
        );
        let cookies = parse_cookies(&headers);
        assert_eq!(cookies.get("session").map(String::as_str), Some("abc123"));
        assert_eq!(cookies.get("theme").map(String::as_str), Some("dark"));
    }

    #[test]
    fn xhr_flag_matches_header_case_insensitively() {
        let mut headers = HeaderMap::new();
        assert!(!is_xhr(&headers));
        headers.insert(
            "x-requested-with",
            HeaderValue::from_static("XMLHttpRequest"),
        );
        assert!(is_xhr(&headers));
        headers.insert("x-requested-with", HeaderValue::from_static("xmlhttprequest"));
        assert!(is_xhr(&headers));
    }

    #[tokio::test]
    async fn non_json_bodies_are_left_out_of_the_subject() {
        let headers = HeaderMap::new();
        let body = Body::from("plain text");
        assert_eq!(read_json_body(&headers, body).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn json_bodies_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = Body::from(r#"{"name":"ada"}"#);
        let value = read_json_body(&headers, body).await.unwrap();
        assert_eq!(value["name"], "ada");
    }

    #[tokio::test]
    async fn malformed_json_bodies_are_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let body = Body::from("{not json");
        let response = read_json_body(&headers, body).await.unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
