//! Status handler registry consulted for non-2xx responses.
//!
//! # Design
//! A registry entry is either a `Handler` callable or `PassThrough`. A code
//! with no entry is the third state: the client surfaces the raw
//! `HttpError`. Registering `None` for a code removes its entry, so the three
//! states are always distinguishable without sentinel comparison.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::ApiError;
use crate::http::HttpResponse;

/// Signature of a status handler: the raw response plus the diagnostic
/// message decoded from its body (if any).
pub type HandlerFn =
    dyn Fn(&HttpResponse, Option<&Value>) -> Result<Value, ApiError> + Send + Sync;

/// What to do with a response whose status has a registry entry.
#[derive(Clone)]
pub enum StatusHandler {
    /// Invoke the callable and return whatever it returns.
    Handler(Arc<HandlerFn>),
    /// Ignore the status and return the diagnostic message as the payload.
    PassThrough,
}

impl StatusHandler {
    pub fn handler<F>(f: F) -> Self
    where
        F: Fn(&HttpResponse, Option<&Value>) -> Result<Value, ApiError> + Send + Sync + 'static,
    {
        StatusHandler::Handler(Arc::new(f))
    }
}

impl fmt::Debug for StatusHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusHandler::Handler(_) => f.write_str("Handler(..)"),
            StatusHandler::PassThrough => f.write_str("PassThrough"),
        }
    }
}

/// Mapping from HTTP status code to its handler.
#[derive(Debug, Clone)]
pub struct StatusHandlers {
    handlers: HashMap<u16, StatusHandler>,
}

impl StatusHandlers {
    /// A registry with no entries at all, not even the 429 default.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register, replace or (with `None`) remove the entry for `code`.
    pub fn set(&mut self, code: u16, handler: Option<StatusHandler>) {
        match handler {
            Some(handler) => {
                self.handlers.insert(code, handler);
            }
            None => {
                self.handlers.remove(&code);
            }
        }
    }

    /// Apply several `set` calls in order. Existing codes that are not
    /// mentioned keep their entries.
    pub fn extend<I>(&mut self, updates: I)
    where
        I: IntoIterator<Item = (u16, Option<StatusHandler>)>,
    {
        for (code, handler) in updates {
            self.set(code, handler);
        }
    }

    pub fn get(&self, code: u16) -> Option<&StatusHandler> {
        self.handlers.get(&code)
    }

    pub fn contains(&self, code: u16) -> bool {
        self.handlers.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for StatusHandlers {
    fn default() -> Self {
        let mut handlers = Self::empty();
        handlers.set(429, Some(StatusHandler::handler(handle_too_many_requests)));
        handlers
    }
}

/// Default handler for 429: turn the response into
/// `ApiError::TooManyRequests` carrying the `Retry-After` seconds.
///
/// Binance omits `Retry-After` when the order-count limit is hit, so a
/// missing header yields `retry_after: None`.
pub fn handle_too_many_requests(
    response: &HttpResponse,
    _message: Option<&Value>,
) -> Result<Value, ApiError> {
    let retry_after = response.header("Retry-After").and_then(|raw| {
        raw.trim()
            .parse::<u64>()
            .map_err(|e| warn!(value = raw, error = %e, "ignoring unparsable Retry-After header"))
            .ok()
    });
    Err(ApiError::TooManyRequests { retry_after })
}
