//! In-process stand-in for a Binance-style exchange REST API.
//!
//! Serves only what the client tests need: time-filtered klines with a
//! maximum span per query, rate-limit and ban responses, a signed order
//! endpoint, a header/query echo and a plain-text ping.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tokio::{net::TcpListener, sync::RwLock};

pub const API_KEY: &str = "mock-api-key";
pub const API_SECRET: &str = "mock-api-secret";
pub const RETRY_AFTER_SECS: u64 = 30;
pub const BAN_RETRY_AFTER_SECS: u64 = 120;

/// Widest `[startTime, endTime)` a single klines query may cover.
pub const MAX_KLINE_SPAN_MS: i64 = 200 * 24 * 60 * 60 * 1000;
pub const DEFAULT_KLINE_LIMIT: usize = 500;
pub const MAX_KLINE_LIMIT: usize = 1000;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Order {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub symbol: String,
    pub side: String,
    pub quantity: String,
    pub status: String,
}

#[derive(Clone, Default)]
pub struct AppState {
    orders: Arc<RwLock<HashMap<u64, Order>>>,
    next_order_id: Arc<AtomicU64>,
    kline_requests: Arc<AtomicU64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KlineQuery {
    pub symbol: String,
    pub interval: Option<String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub limit: Option<usize>,
}

pub fn app() -> Router {
    Router::new()
        .route("/api/v3/ping", get(ping))
        .route("/api/v3/time", get(server_time))
        .route("/api/v3/klines", get(klines))
        .route("/api/v3/limited", get(rate_limited))
        .route("/api/v3/order-limited", get(order_rate_limited))
        .route("/api/v3/banned", get(banned))
        .route("/api/v3/order", post(create_order))
        .route("/api/v3/openOrders", get(open_orders))
        .route("/mock/stats", get(stats))
        .route("/echo", get(echo))
        .route("/text", get(text))
        .with_state(AppState::default())
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn api_error(status: StatusCode, code: i64, msg: &str) -> Response {
    (status, Json(json!({ "code": code, "msg": msg }))).into_response()
}

async fn ping() -> Json<Value> {
    Json(json!({}))
}

async fn server_time() -> Json<Value> {
    Json(json!({ "serverTime": chrono::Utc::now().timestamp_millis() }))
}

fn interval_ms(interval: &str) -> Option<i64> {
    let minute = 60_000;
    match interval {
        "1m" => Some(minute),
        "1h" => Some(60 * minute),
        "1d" => Some(24 * 60 * minute),
        _ => None,
    }
}

/// Deterministic candles with open times aligned to the interval inside
/// `[startTime, endTime)`.
async fn klines(State(state): State<AppState>, Query(query): Query<KlineQuery>) -> Response {
    state.kline_requests.fetch_add(1, Ordering::SeqCst);

    if query.symbol.is_empty() || !query.symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()) {
        return api_error(StatusCode::BAD_REQUEST, -1121, "Invalid symbol.");
    }
    let Some(step) = interval_ms(query.interval.as_deref().unwrap_or("1d")) else {
        return api_error(StatusCode::BAD_REQUEST, -1120, "Invalid interval.");
    };
    let (Some(start), Some(end)) = (query.start_time, query.end_time) else {
        return api_error(StatusCode::BAD_REQUEST, -1102, "startTime and endTime are required.");
    };
    if start >= end {
        return api_error(StatusCode::BAD_REQUEST, -1127, "startTime must be before endTime.");
    }
    if end - start > MAX_KLINE_SPAN_MS {
        return api_error(StatusCode::BAD_REQUEST, -1127, "More than 200 days between startTime and endTime.");
    }
    let limit = query.limit.unwrap_or(DEFAULT_KLINE_LIMIT).min(MAX_KLINE_LIMIT);

    let first = start.div_euclid(step) * step + if start.rem_euclid(step) == 0 { 0 } else { step };
    let candles: Vec<Value> = (0..)
        .map(|i| first + i * step)
        .take_while(|open| *open < end)
        .take(limit)
        .map(|open| {
            let price = 100.0 + (open / step % 50) as f64;
            json!([
                open,
                format!("{price:.2}"),
                format!("{:.2}", price + 1.0),
                format!("{:.2}", price - 1.0),
                format!("{:.2}", price + 0.5),
                "10.00",
                open + step - 1
            ])
        })
        .collect();
    Json(Value::Array(candles)).into_response()
}

async fn rate_limited() -> Response {
    let mut response = api_error(StatusCode::TOO_MANY_REQUESTS, -1003, "Too many requests.");
    response.headers_mut().insert(header::RETRY_AFTER, RETRY_AFTER_SECS.into());
    response
}

async fn order_rate_limited() -> Response {
    api_error(StatusCode::TOO_MANY_REQUESTS, -1015, "Too many new orders.")
}

async fn banned() -> Response {
    let mut response = api_error(StatusCode::IM_A_TEAPOT, -1003, "Way too many requests; IP banned.");
    response.headers_mut().insert(header::RETRY_AFTER, BAN_RETRY_AFTER_SECS.into());
    response
}

fn signature_matches(payload: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(API_SECRET.as_bytes()) else {
        return false;
    };
    mac.update(payload.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Signed endpoint: the form body must end with `&signature=<hex>`, the HMAC
/// of everything before it.
async fn create_order(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    if headers.get("X-MBX-APIKEY").and_then(|v| v.to_str().ok()) != Some(API_KEY) {
        return api_error(StatusCode::UNAUTHORIZED, -2015, "Invalid API-key, IP, or permissions for action.");
    }
    let Some((payload, signature)) = body.rsplit_once("&signature=") else {
        return api_error(StatusCode::BAD_REQUEST, -1102, "Mandatory parameter 'signature' was not sent.");
    };
    if !signature_matches(payload, signature) {
        return api_error(StatusCode::BAD_REQUEST, -1022, "Signature for this request is not valid.");
    }

    let fields: HashMap<String, String> = url::form_urlencoded::parse(payload.as_bytes()).into_owned().collect();
    let (Some(symbol), Some(side), Some(quantity)) = (fields.get("symbol"), fields.get("side"), fields.get("quantity"))
    else {
        return api_error(StatusCode::BAD_REQUEST, -1102, "Mandatory parameter missing.");
    };

    let order = Order {
        order_id: state.next_order_id.fetch_add(1, Ordering::SeqCst) + 1,
        symbol: symbol.clone(),
        side: side.clone(),
        quantity: quantity.clone(),
        status: "NEW".to_string(),
    };
    state.orders.write().await.insert(order.order_id, order.clone());
    Json(order).into_response()
}

async fn open_orders(State(state): State<AppState>) -> Json<Vec<Order>> {
    let orders = state.orders.read().await;
    let mut orders: Vec<Order> = orders.values().cloned().collect();
    orders.sort_by_key(|o| o.order_id);
    Json(orders)
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "klineRequests": state.kline_requests.load(Ordering::SeqCst) }))
}

/// Reflect the request headers (lowercased names) and query parameters.
async fn echo(headers: HeaderMap, Query(query): Query<BTreeMap<String, String>>) -> Json<Value> {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    Json(json!({ "headers": headers, "query": query }))
}

async fn text() -> &'static str {
    "pong"
}
