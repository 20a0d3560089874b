//! Base client for typed REST API wrappers.
//!
//! # Design
//! `BaseClient` owns a `ClientConfig`, the status handler registry, a
//! `Transport` and a `Pacer`. Every call is split into `build_request`, which
//! produces an `HttpRequest` as plain data, the transport round-trip, and
//! `process_response`, which decodes a success or dispatches a failure to the
//! registry. Per-call inputs arrive as an owned `RequestSpec`, so nothing the
//! caller holds is ever aliased or mutated.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use crate::batch::{Pacer, ThreadPacer};
use crate::config::ClientConfig;
use crate::error::{ApiError, Result};
use crate::http::{HttpMethod, HttpRequest, HttpResponse, ResponseKind};
use crate::signatures::encode_params;
use crate::status::{StatusHandler, StatusHandlers};
use crate::transport::{Transport, UreqTransport};

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Everything that varies between two calls to the same client.
///
/// Either `url` or `endpoint` must be set; `url` wins when both are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestSpec {
    pub url: Option<String>,
    pub endpoint: Option<String>,
    /// Query parameters (GET) or form fields (POST), in send order.
    pub params: Vec<(String, String)>,
    pub headers: BTreeMap<String, String>,
    pub method: HttpMethod,
    /// Overrides the client's `response_kind` for this call.
    pub response_kind: Option<ResponseKind>,
}

impl RequestSpec {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Append a parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.to_string())));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn response_kind(mut self, response_kind: ResponseKind) -> Self {
        self.response_kind = Some(response_kind);
        self
    }

    /// Replace the value of `name` in place, or append it if absent.
    pub fn set_param(&mut self, name: &str, value: impl ToString) {
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => *existing = value,
            None => self.params.push((name.to_string(), value)),
        }
    }

    pub fn get_param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Synchronous client shared by every API wrapper built on this crate.
pub struct BaseClient {
    config: ClientConfig,
    request_interval: Duration,
    status_handlers: StatusHandlers,
    transport: Box<dyn Transport + Send>,
    pacer: Box<dyn Pacer + Send>,
}

impl fmt::Debug for BaseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseClient")
            .field("config", &self.config)
            .field("request_interval", &self.request_interval)
            .field("status_handlers", &self.status_handlers)
            .finish_non_exhaustive()
    }
}

impl BaseClient {
    /// Client over a blocking `ureq` transport.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_transport(config, UreqTransport::new())
    }

    pub fn with_transport<T>(config: ClientConfig, transport: T) -> Result<Self>
    where
        T: Transport + Send + 'static,
    {
        let request_interval = config.request_interval()?;
        Ok(Self {
            config,
            request_interval,
            status_handlers: StatusHandlers::default(),
            transport: Box::new(transport),
            pacer: Box::new(ThreadPacer),
        })
    }

    /// Merge `updates` over the current registry (the 429 default included).
    pub fn with_status_handlers<I>(mut self, updates: I) -> Self
    where
        I: IntoIterator<Item = (u16, Option<StatusHandler>)>,
    {
        self.add_status_handlers(updates);
        self
    }

    pub fn with_pacer<P>(mut self, pacer: P) -> Self
    where
        P: Pacer + Send + 'static,
    {
        self.pacer = Box::new(pacer);
        self
    }

    /// Override existing entries, add new ones, remove those mapped to `None`.
    /// Codes not mentioned keep their handlers.
    pub fn add_status_handlers<I>(&mut self, updates: I)
    where
        I: IntoIterator<Item = (u16, Option<StatusHandler>)>,
    {
        self.status_handlers.extend(updates);
    }

    pub fn set_status_handler(&mut self, code: u16, handler: Option<StatusHandler>) {
        self.status_handlers.set(code, handler);
    }

    pub fn status_handlers(&self) -> &StatusHandlers {
        &self.status_handlers
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.config.headers
    }

    pub fn response_kind(&self) -> ResponseKind {
        self.config.response_kind
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Minimum pause between consecutive batched calls.
    pub fn request_interval(&self) -> Duration {
        self.request_interval
    }

    pub(crate) fn pace(&self, pause: Duration) {
        self.pacer.pause(pause);
    }

    /// Issue one request and decode its response.
    pub fn request(&self, spec: RequestSpec) -> Result<Value> {
        let request = self.build_request(&spec)?;
        debug!(method = %request.method, url = %request.url, "sending request");
        let response = self.transport.execute(&request)?;
        self.process_response(response, spec.response_kind)
    }

    /// Resolve the URL, merge headers and encode parameters.
    pub fn build_request(&self, spec: &RequestSpec) -> Result<HttpRequest> {
        let mut url = match (&spec.url, &spec.endpoint) {
            (Some(url), _) => url.clone(),
            (None, Some(endpoint)) => format!("{}{}", self.config.base_url, endpoint),
            (None, None) => {
                return Err(ApiError::invalid("either `url` or `endpoint` must be provided"));
            }
        };

        // Header names are case-insensitive: a call header replaces any
        // default with the same name, whatever its spelling.
        let mut headers: Vec<(String, String)> = self
            .config
            .headers
            .iter()
            .filter(|(name, _)| !spec.headers.keys().any(|k| k.eq_ignore_ascii_case(name)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        headers.extend(spec.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let encoded = encode_params(&spec.params);
        let body = match spec.method {
            HttpMethod::Get => {
                if !encoded.is_empty() {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str(&encoded);
                }
                None
            }
            HttpMethod::Post => {
                if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    headers.push(("content-type".to_string(), FORM_CONTENT_TYPE.to_string()));
                }
                Some(encoded)
            }
        };

        Ok(HttpRequest {
            method: spec.method,
            url,
            headers,
            body,
        })
    }

    /// Decode a success, or hand a failure to the status handler registry.
    pub fn process_response(&self, response: HttpResponse, response_kind: Option<ResponseKind>) -> Result<Value> {
        let kind = response_kind.unwrap_or(self.config.response_kind);
        if response.is_success() {
            return decode_body(&response.body, kind);
        }

        let message = diagnostic_message(&response.body, kind);
        match self.status_handlers.get(response.status) {
            Some(StatusHandler::Handler(handler)) => handler(&response, message.as_ref()),
            Some(StatusHandler::PassThrough) => Ok(message.unwrap_or(Value::Null)),
            None => {
                error!(status = response.status, message = ?message, "unhandled error response");
                Err(ApiError::HttpError {
                    status: response.status,
                    body: response.body,
                })
            }
        }
    }
}

fn decode_body(body: &str, kind: ResponseKind) -> Result<Value> {
    match kind {
        ResponseKind::Json if body.trim().is_empty() => Ok(Value::Null),
        ResponseKind::Json => {
            serde_json::from_str(body).map_err(|e| ApiError::DeserializationError(e.to_string()))
        }
        ResponseKind::Text => Ok(Value::String(body.to_string())),
    }
}

/// Best-effort message from an error body: JSON, then text, then nothing.
fn diagnostic_message(body: &str, kind: ResponseKind) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    if kind == ResponseKind::Json {
        if let Ok(value) = serde_json::from_str(body) {
            return Some(value);
        }
    }
    Some(Value::String(body.to_string()))
}
