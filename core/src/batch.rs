//! Batched time-range requests.
//!
//! # Overview
//! Upstream APIs cap the time span a single query may cover (Binance allows
//! at most a few months per kline request). `BaseClient::batched_request`
//! runs one logical query over an arbitrary range by splitting it into
//! half-open windows, issuing one call per window in ascending order, and
//! concatenating the results.
//!
//! # Design
//! - Windows tile `[t1, t2)` exactly: each window's end is the next window's
//!   start, so nothing is fetched twice and nothing is skipped.
//! - Calls are sequential. Between two calls the client pauses for
//!   `request_interval()` through its `Pacer`; there is no pause after the
//!   last window.
//! - The first failing window aborts the run and its error is returned.
//!   Partial results are dropped, since they could be mistaken for the full
//!   range.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
use serde_json::Value;
use tracing::debug;

use crate::client::{BaseClient, RequestSpec};
use crate::error::{ApiError, Result};
use crate::times::TimeArg;

/// Parameter names the windows are sent under, in milliseconds.
pub const START_TIME_PARAM: &str = "startTime";
pub const END_TIME_PARAM: &str = "endTime";
pub const LIMIT_PARAM: &str = "limit";

pub const DEFAULT_WINDOW_DAYS: i64 = 90;

pub fn default_window_span() -> TimeDelta {
    TimeDelta::days(DEFAULT_WINDOW_DAYS)
}

/// Blocks the calling thread between consecutive requests.
pub trait Pacer {
    fn pause(&self, duration: Duration);
}

/// Pacer backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn pause(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Half-open interval `[start, end)` covered by one upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(ApiError::invalid(format!(
                "time window start {start} must be before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }

    pub fn span(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Turn optional bounds into a concrete range.
///
/// Both absent means an unbounded query (`Ok(None)`). A single bound is
/// completed by `span` in the natural direction. Bounds are truncated to
/// whole milliseconds, the resolution they are sent at.
pub fn resolve_range(
    t1: Option<&TimeArg>,
    t2: Option<&TimeArg>,
    span: TimeDelta,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    check_span(span)?;
    let overflow = || ApiError::invalid("time range bound is out of range");
    let (start, end) = match (t1, t2) {
        (None, None) => return Ok(None),
        (Some(t1), None) => {
            let start = t1.to_utc()?;
            (start, start.checked_add_signed(span).ok_or_else(overflow)?)
        }
        (None, Some(t2)) => {
            let end = t2.to_utc()?;
            (end.checked_sub_signed(span).ok_or_else(overflow)?, end)
        }
        (Some(t1), Some(t2)) => (t1.to_utc()?, t2.to_utc()?),
    };
    let (start, end) = (start.trunc_subsecs(3), end.trunc_subsecs(3));
    if start >= end {
        return Err(ApiError::invalid(format!(
            "t1 ({start}) must be before t2 ({end})"
        )));
    }
    Ok(Some((start, end)))
}

/// Split `[start, end)` into consecutive windows no longer than `span`.
/// Only the final window may be shorter.
pub fn plan_windows(start: DateTime<Utc>, end: DateTime<Utc>, span: TimeDelta) -> Result<Vec<TimeWindow>> {
    check_span(span)?;
    if start >= end {
        return Err(ApiError::invalid(format!(
            "t1 ({start}) must be before t2 ({end})"
        )));
    }

    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = cursor.checked_add_signed(span).map_or(end, |next| next.min(end));
        windows.push(TimeWindow { start: cursor, end: next });
        cursor = next;
    }
    Ok(windows)
}

fn check_span(span: TimeDelta) -> Result<()> {
    if span < TimeDelta::milliseconds(1) {
        return Err(ApiError::invalid(format!(
            "window span must be at least one millisecond, received {span}"
        )));
    }
    Ok(())
}

/// Arrays are flattened into `acc`; any other payload is appended whole.
pub fn accumulate(acc: &mut Vec<Value>, payload: Value) {
    match payload {
        Value::Array(items) => acc.extend(items),
        other => acc.push(other),
    }
}

/// One logical query over a time range.
#[derive(Debug, Clone)]
pub struct BatchedRequest {
    pub request: RequestSpec,
    pub t1: Option<TimeArg>,
    pub t2: Option<TimeArg>,
    pub window_span: TimeDelta,
    /// Per-page limit, sent as the `limit` parameter when set.
    pub limit: Option<u32>,
}

impl BatchedRequest {
    pub fn new(request: RequestSpec) -> Self {
        Self {
            request,
            t1: None,
            t2: None,
            window_span: default_window_span(),
            limit: None,
        }
    }

    pub fn start(mut self, t1: impl Into<TimeArg>) -> Self {
        self.t1 = Some(t1.into());
        self
    }

    pub fn end(mut self, t2: impl Into<TimeArg>) -> Self {
        self.t2 = Some(t2.into());
        self
    }

    pub fn window_span(mut self, span: TimeDelta) -> Self {
        self.window_span = span;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl BaseClient {
    /// Run `batch` window by window and return every item in chronological
    /// order.
    pub fn batched_request(&self, batch: BatchedRequest) -> Result<Vec<Value>> {
        let BatchedRequest {
            mut request,
            t1,
            t2,
            window_span,
            limit,
        } = batch;
        if let Some(limit) = limit {
            request.set_param(LIMIT_PARAM, limit);
        }

        let mut responses = Vec::new();
        let Some((start, end)) = resolve_range(t1.as_ref(), t2.as_ref(), window_span)? else {
            accumulate(&mut responses, self.request(request)?);
            return Ok(responses);
        };

        let windows = plan_windows(start, end, window_span)?;
        let total = windows.len();
        for (i, window) in windows.into_iter().enumerate() {
            if i > 0 {
                self.pace(self.request_interval());
            }
            debug!(batch = i + 1, total, start = %window.start(), end = %window.end(), "requesting window");

            let mut spec = request.clone();
            spec.set_param(START_TIME_PARAM, window.start_ms());
            spec.set_param(END_TIME_PARAM, window.end_ms());
            accumulate(&mut responses, self.request(spec)?);
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::config::ClientConfig;
    use crate::http::HttpResponse;
    use crate::test_support::{Canned, RecordingPacer};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, d, 0, 0, 0).unwrap()
    }

    fn client(responses: Vec<HttpResponse>, rate: f64) -> (BaseClient, Canned, RecordingPacer) {
        let canned = Canned::with(responses);
        let pacer = RecordingPacer::default();
        let config = ClientConfig::new("https://api.example.com").with_max_requests_per_min(rate);
        let client = BaseClient::with_transport(config, canned.clone())
            .unwrap()
            .with_pacer(pacer.clone());
        (client, canned, pacer)
    }

    fn query(url: &str) -> Vec<(String, String)> {
        let query = url.split_once('?').map_or("", |(_, q)| q);
        url::form_urlencoded::parse(query.as_bytes()).into_owned().collect()
    }

    fn param<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
        pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    #[test]
    fn windows_tile_range_exactly() {
        let start = day(1) + TimeDelta::minutes(7);
        let end = day(20) + TimeDelta::seconds(13);
        for span in [TimeDelta::hours(1), TimeDelta::days(3), TimeDelta::days(7), TimeDelta::days(19)] {
            let windows = plan_windows(start, end, span).unwrap();
            assert_eq!(windows.first().unwrap().start(), start);
            assert_eq!(windows.last().unwrap().end(), end);
            for pair in windows.windows(2) {
                assert_eq!(pair[0].end(), pair[1].start());
            }
            for w in &windows {
                assert!(w.start() < w.end());
                assert!(w.span() <= span);
                assert!(w.start() >= start && w.end() <= end);
            }
            for w in &windows[..windows.len() - 1] {
                assert_eq!(w.span(), span);
            }
        }
    }

    #[test]
    fn short_range_is_a_single_window() {
        let windows = plan_windows(day(1), day(3), TimeDelta::days(90)).unwrap();
        assert_eq!(windows, vec![TimeWindow::new(day(1), day(3)).unwrap()]);
        let windows = plan_windows(day(1), day(3), TimeDelta::days(2)).unwrap();
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn invalid_plans_are_rejected() {
        assert!(plan_windows(day(3), day(3), TimeDelta::days(1)).is_err());
        assert!(plan_windows(day(3), day(1), TimeDelta::days(1)).is_err());
        assert!(plan_windows(day(1), day(3), TimeDelta::zero()).is_err());
        assert!(plan_windows(day(1), day(3), TimeDelta::microseconds(500)).is_err());
        assert!(TimeWindow::new(day(2), day(1)).is_err());
    }

    #[test]
    fn resolve_range_derives_missing_bound() {
        let span = TimeDelta::days(5);
        let t1 = TimeArg::from(day(1));
        let t2 = TimeArg::from(day(10));
        assert_eq!(resolve_range(None, None, span).unwrap(), None);
        assert_eq!(resolve_range(Some(&t1), None, span).unwrap(), Some((day(1), day(6))));
        assert_eq!(resolve_range(None, Some(&t2), span).unwrap(), Some((day(5), day(10))));
        assert_eq!(resolve_range(Some(&t1), Some(&t2), span).unwrap(), Some((day(1), day(10))));
        let err = resolve_range(Some(&t2), Some(&t1), span).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn resolve_range_truncates_bounds_to_millis() {
        let span = TimeDelta::days(1);
        let t1 = TimeArg::from(day(1) + TimeDelta::microseconds(1_700));
        let t2 = TimeArg::from(day(2) + TimeDelta::microseconds(2_999));
        assert_eq!(
            resolve_range(Some(&t1), Some(&t2), span).unwrap(),
            Some((day(1) + TimeDelta::milliseconds(1), day(2) + TimeDelta::milliseconds(2)))
        );

        // Both bounds fall inside the same millisecond.
        let t1 = TimeArg::Seconds(0.0001);
        let t2 = TimeArg::Seconds(0.0009);
        let err = resolve_range(Some(&t1), Some(&t2), span).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    }

    #[test]
    fn sub_millisecond_range_fails_before_any_call() {
        let (client, canned, _) = client(vec![], 60.0);
        let batch = BatchedRequest::new(RequestSpec::endpoint("/k"))
            .start(TimeArg::Seconds(0.0001))
            .end(TimeArg::Seconds(0.0009));
        let err = client.batched_request(batch).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
        assert!(canned.seen().is_empty());
    }

    #[test]
    fn accumulate_flattens_arrays_only() {
        let mut acc = Vec::new();
        accumulate(&mut acc, json!([1, 2]));
        accumulate(&mut acc, json!({"a": 1}));
        accumulate(&mut acc, json!([]));
        accumulate(&mut acc, json!("x"));
        assert_eq!(acc, vec![json!(1), json!(2), json!({"a": 1}), json!("x")]);
    }

    #[test]
    fn batched_run_overlays_time_params_and_paces_between_calls() {
        let responses = vec![
            HttpResponse::new(200, "[1,2]"),
            HttpResponse::new(200, "[3]"),
            HttpResponse::new(200, "[4,5]"),
        ];
        let (client, canned, pacer) = client(responses, 120.0);
        let batch = BatchedRequest::new(
            RequestSpec::endpoint("/api/v3/klines")
                .param("symbol", "BTCUSDT")
                .param("startTime", 0),
        )
        .start(day(1))
        .end(day(8))
        .window_span(TimeDelta::days(3))
        .limit(500);

        let items = client.batched_request(batch).unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);

        let seen = canned.seen();
        assert_eq!(seen.len(), 3);
        let bounds = [(day(1), day(4)), (day(4), day(7)), (day(7), day(8))];
        for (req, (start, end)) in seen.iter().zip(bounds) {
            let pairs = query(&req.url);
            assert_eq!(param(&pairs, "symbol"), Some("BTCUSDT"));
            assert_eq!(param(&pairs, "limit"), Some("500"));
            assert_eq!(param(&pairs, "startTime"), Some(start.timestamp_millis().to_string().as_str()));
            assert_eq!(param(&pairs, "endTime"), Some(end.timestamp_millis().to_string().as_str()));
            assert_eq!(pairs.iter().filter(|(k, _)| k == "startTime").count(), 1);
        }

        let pauses = pacer.pauses();
        assert_eq!(pauses, vec![Duration::from_millis(500); 2]);
    }

    #[test]
    fn unbounded_run_is_one_call_without_time_params() {
        let (client, canned, pacer) = client(vec![HttpResponse::new(200, r#"{"serverTime":1}"#)], 60.0);
        let items = client
            .batched_request(BatchedRequest::new(RequestSpec::endpoint("/api/v3/time")))
            .unwrap();
        assert_eq!(items, vec![json!({"serverTime": 1})]);
        let seen = canned.seen();
        assert_eq!(seen[0].url, "https://api.example.com/api/v3/time");
        assert!(pacer.pauses().is_empty());
    }

    #[test]
    fn only_end_bound_walks_back_one_span() {
        let (client, canned, _) = client(vec![HttpResponse::new(200, "[]")], 60.0);
        let batch = BatchedRequest::new(RequestSpec::endpoint("/k")).end(day(10));
        client.batched_request(batch).unwrap();
        let seen = canned.seen();
        let pairs = query(&seen[0].url);
        let expected_start = (day(10) - TimeDelta::days(90)).timestamp_millis().to_string();
        assert_eq!(param(&pairs, "startTime"), Some(expected_start.as_str()));
    }

    #[test]
    fn failing_window_aborts_the_run() {
        let responses = vec![
            HttpResponse::new(200, "[1]"),
            HttpResponse::new(429, "").with_header("Retry-After", "12"),
            HttpResponse::new(200, "[3]"),
        ];
        let (client, canned, pacer) = client(responses, 60.0);
        let batch = BatchedRequest::new(RequestSpec::endpoint("/k"))
            .start(day(1))
            .end(day(4))
            .window_span(TimeDelta::days(1));
        let err = client.batched_request(batch).unwrap_err();
        assert!(matches!(err, ApiError::TooManyRequests { retry_after: Some(12) }));
        assert_eq!(canned.seen().len(), 2);
        assert_eq!(pacer.pauses().len(), 1);
    }

    #[test]
    fn inverted_range_fails_before_any_call() {
        let (client, canned, _) = client(vec![], 60.0);
        let batch = BatchedRequest::new(RequestSpec::endpoint("/k")).start(day(5)).end(day(2));
        let err = client.batched_request(batch).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
        assert!(canned.seen().is_empty());
    }
}
