//! Long-lived client configuration.
//!
//! # Design
//! `ClientConfig` is the only state that outlives a single call. It derives
//! `Deserialize` with field defaults so an API wrapper can embed it in its
//! own settings file and only spell out what differs.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};
use crate::http::ResponseKind;

pub const DEFAULT_MAX_REQUESTS_PER_MIN: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix joined with a request's `endpoint`. Empty when every call
    /// passes a full `url`.
    pub base_url: String,
    /// Headers sent with every request. Per-call headers win on collision.
    pub headers: BTreeMap<String, String>,
    /// Rate ceiling used to pace batched requests.
    pub max_requests_per_min: f64,
    pub response_kind: ResponseKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            headers: BTreeMap::new(),
            max_requests_per_min: DEFAULT_MAX_REQUESTS_PER_MIN,
            response_kind: ResponseKind::Json,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_max_requests_per_min(mut self, max_requests_per_min: f64) -> Self {
        self.max_requests_per_min = max_requests_per_min;
        self
    }

    pub fn with_response_kind(mut self, response_kind: ResponseKind) -> Self {
        self.response_kind = response_kind;
        self
    }

    /// Minimum pause between consecutive requests: `60 / max_requests_per_min`
    /// seconds.
    pub fn request_interval(&self) -> Result<Duration> {
        let rate = self.max_requests_per_min;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ApiError::invalid(format!(
                "max_requests_per_min must be a positive number, received {rate}"
            )));
        }
        Duration::try_from_secs_f64(60.0 / rate)
            .map_err(|e| ApiError::invalid(format!("max_requests_per_min {rate} is too small: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        self.request_interval().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "");
        assert!(config.headers.is_empty());
        assert_eq!(config.response_kind, ResponseKind::Json);
        assert_eq!(config.request_interval().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn interval_is_sixty_over_rate() {
        for (rate, expected_ms) in [(60.0, 1000), (120.0, 500), (1200.0, 50), (30.0, 2000), (0.5, 120_000)] {
            let config = ClientConfig::default().with_max_requests_per_min(rate);
            assert_eq!(config.request_interval().unwrap(), Duration::from_millis(expected_ms), "rate {rate}");
        }
    }

    #[test]
    fn non_positive_rate_is_rejected() {
        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let config = ClientConfig::default().with_max_requests_per_min(rate);
            assert!(matches!(config.validate(), Err(ApiError::InvalidArgument(_))), "rate {rate}");
        }
    }

    #[test]
    fn deserializes_with_partial_fields() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url":"https://api.binance.com","response_kind":"text","headers":{"X-MBX-APIKEY":"k"}}"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.binance.com");
        assert_eq!(config.response_kind, ResponseKind::Text);
        assert_eq!(config.headers["X-MBX-APIKEY"], "k");
        assert_eq!(config.max_requests_per_min, DEFAULT_MAX_REQUESTS_PER_MIN);
    }
}
