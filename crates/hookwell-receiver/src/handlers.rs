//! Ingest fast path and auxiliary receiver routes.
//!
//! The webhook handler never performs a synchronous store write: endpoint
//! configuration and quota come from the caches, the capture goes into the
//! batcher, and the sender gets the endpoint's configured response
//! immediately.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use hookwell_proto::{is_valid_slug, BufferedRequest, MockResponse};

use crate::cache::EndpointLookup;
use crate::ReceiverState;

/// Response headers that must not be forwarded from mock responses.
const BLOCKED_HEADERS: &[&str] = &[
    "set-cookie",
    "strict-transport-security",
    "content-security-policy",
    "x-frame-options",
];

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Extract the real client IP from proxy headers, falling back to the peer
/// address.
fn real_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    peer.ip().to_string()
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// `ANY /w/{slug}` — no trailing path.
pub async fn handle_webhook_root(
    state: State<Arc<ReceiverState>>,
    connect_info: ConnectInfo<SocketAddr>,
    method: Method,
    Path(slug): Path<String>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_webhook(
        state,
        connect_info,
        method,
        Path((slug, String::new())),
        query,
        headers,
        body,
    )
    .await
}

/// `ANY /w/{slug}/{*path}` — the ingest fast path.
pub async fn handle_webhook(
    State(state): State<Arc<ReceiverState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    Path((slug, path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // A slug that can't exist never reaches the store.
    if !is_valid_slug(&slug) {
        return (StatusCode::NOT_FOUND, "Endpoint not found").into_response();
    }

    let req_path = if path.is_empty() {
        "/".to_string()
    } else if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };

    // Endpoint configuration from cache (mock response and validity).
    let lookup = match state.endpoint_for(&slug).await {
        Ok(Some(lookup)) => lookup,
        Ok(None) => return (StatusCode::NOT_FOUND, "Endpoint not found").into_response(),
        Err(error) => {
            warn!(slug, %error, "endpoint info fetch failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };
    let info = match lookup.as_ref() {
        EndpointLookup::Found(info) => info,
        EndpointLookup::NotFound => {
            return (StatusCode::NOT_FOUND, "Endpoint not found").into_response();
        }
    };

    if !info.is_live_at(now_ms()) {
        return (StatusCode::GONE, "Endpoint expired").into_response();
    }

    // Quota check-and-consume from cache; fail open on lookup errors for
    // availability.
    match state.quota_for(&slug).await {
        Ok(Some(quota)) => {
            if !quota.try_consume() {
                return (StatusCode::TOO_MANY_REQUESTS, "Request limit exceeded").into_response();
            }
        }
        Ok(None) => {}
        Err(error) => {
            warn!(slug, %error, "quota check failed, allowing request");
        }
    }

    // Collect headers and query parameters verbatim.
    let mut header_map = BTreeMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_string(), value.to_string());
        }
    }
    let ip = real_ip(&headers, peer);

    state.batcher.add(
        &slug,
        BufferedRequest {
            method: method.as_str().to_string(),
            path: req_path,
            headers: header_map,
            body: String::from_utf8_lossy(&body).into_owned(),
            query_params: query.into_iter().collect(),
            ip,
            received_at: now_ms(),
        },
    );

    // Answer from cache immediately.
    match &info.mock_response {
        Some(mock) => build_mock_response(mock),
        None => "OK".into_response(),
    }
}

fn build_mock_response(mock: &MockResponse) -> Response {
    // Out-of-range statuses fall back to 200.
    let status = if (100..=599).contains(&mock.status) {
        StatusCode::from_u16(mock.status as u16).unwrap_or(StatusCode::OK)
    } else {
        StatusCode::OK
    };

    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &mock.headers {
        let lowered = name.to_lowercase();
        if BLOCKED_HEADERS.contains(&lowered.as_str()) {
            continue;
        }
        // CRLF in a name or value is header injection.
        if name.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Body::from(mock.body.clone()))
        .unwrap_or_else(|_| {
            axum::http::Response::builder()
                .status(StatusCode::OK)
                .body(Body::from("OK"))
                .unwrap()
        })
}

/// `POST /cache-invalidate/{slug}` — evict a slug from both caches after a
/// configuration change. Shares the store's secret; fails closed when none
/// is configured.
pub async fn cache_invalidate(
    State(state): State<Arc<ReceiverState>>,
    Path(slug): Path<String>,
    headers: HeaderMap,
) -> Response {
    let authorized = match &state.shared_secret {
        Some(secret) => {
            let presented = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            let expected = format!("Bearer {secret}");
            bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
        }
        None => false,
    };
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "unauthorized"})),
        )
            .into_response();
    }

    state.endpoint_cache.invalidate(&slug);
    state.quota_cache.invalidate(&slug);
    debug!(slug, "cache invalidated");

    Json(json!({"ok": true})).into_response()
}
