//! HTTP transport types for the host-does-IO pattern.
//!
//! # Design
//! These types describe HTTP requests and responses as plain data.
//! `BaseClient` builds `HttpRequest` values and parses `HttpResponse` values;
//! a `Transport` implementation performs the actual network round-trip in
//! between. Keeping the boundary as data makes every status-handling path
//! testable with canned responses.
//!
//! All fields use owned types (`String`, `Vec`) so requests and responses can
//! be recorded and replayed without lifetime concerns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// HTTP method for a request. Only GET and POST are defined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(HttpMethod::Get),
            "post" => Ok(HttpMethod::Post),
            other => Err(ApiError::invalid(format!(
                "method must be one of [\"get\", \"post\"], received {other:?}"
            ))),
        }
    }
}

/// How a successful response body is decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    #[default]
    Json,
    Text,
}

impl FromStr for ResponseKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ResponseKind::Json),
            "text" => Ok(ResponseKind::Text),
            other => Err(ApiError::invalid(format!(
                "response kind must be one of [\"json\", \"text\"], received {other:?}"
            ))),
        }
    }
}

/// An HTTP request described as plain data.
///
/// `url` already carries the encoded query string. For POST requests the
/// parameters travel form-encoded in `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("GET".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert!(matches!(
            "delete".parse::<HttpMethod>(),
            Err(ApiError::InvalidArgument(_))
        ));
    }

    #[test]
    fn response_kind_parses_and_deserializes() {
        assert_eq!("Text".parse::<ResponseKind>().unwrap(), ResponseKind::Text);
        let kind: ResponseKind = serde_json::from_str(r#""json""#).unwrap();
        assert_eq!(kind, ResponseKind::Json);
        assert!("xml".parse::<ResponseKind>().is_err());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let response = HttpResponse::new(429, "").with_header("retry-after", "30");
        assert_eq!(response.header("Retry-After"), Some("30"));
        assert_eq!(response.header("X-Missing"), None);
    }

    #[test]
    fn success_range_is_2xx() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(301, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
    }
}
