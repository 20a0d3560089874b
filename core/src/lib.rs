//! Base layer for typed REST API wrappers.
//!
//! # Overview
//! `BaseClient` issues GET/POST requests against a base URL with merged
//! default and per-call headers, decodes JSON or text bodies, and routes
//! non-2xx responses through a registry of status handlers. On top of that
//! it runs batched time-range queries: one logical request over an arbitrary
//! span, split into bounded windows and paced to stay under a per-minute
//! rate ceiling.
//!
//! # Design
//! - Requests and responses are plain data (`HttpRequest`, `HttpResponse`);
//!   a `Transport` performs the round-trip. `UreqTransport` is the default.
//! - Status handling is a tagged registry: a handler callable, pass-through,
//!   or no entry (the raw `HttpError` is returned).
//! - All time arithmetic happens in UTC (`times`); request signing helpers
//!   live in `signatures`.
//!
//! # Example
//! ```no_run
//! use sosapi_core::{BaseClient, BatchedRequest, ClientConfig, RequestSpec};
//!
//! # fn main() -> Result<(), sosapi_core::ApiError> {
//! let client = BaseClient::new(
//!     ClientConfig::new("https://api.binance.com").with_max_requests_per_min(1200.0),
//! )?;
//! let klines = client.batched_request(
//!     BatchedRequest::new(
//!         RequestSpec::endpoint("/api/v3/klines")
//!             .param("symbol", "BTCUSDT")
//!             .param("interval", "1d"),
//!     )
//!     .start("2021-01-01 00:00:00 UTC")
//!     .end("2022-01-01 00:00:00 UTC")
//!     .limit(1000),
//! )?;
//! println!("{} candles", klines.len());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod signatures;
pub mod status;
pub mod times;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use batch::{BatchedRequest, Pacer, ThreadPacer, TimeWindow};
pub use client::{BaseClient, RequestSpec};
pub use config::ClientConfig;
pub use error::ApiError;
pub use http::{HttpMethod, HttpRequest, HttpResponse, ResponseKind};
pub use signatures::{sign_message, sign_params, SignatureAlgorithm};
pub use status::{StatusHandler, StatusHandlers};
pub use times::{TimeArg, TimestampUnit, Zone};
pub use transport::{Transport, UreqTransport};
