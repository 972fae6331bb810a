//! Integration tests for the receiver ingest path
//!
//! Runs the real receiver router against a stub store spawned on an
//! ephemeral port, so cache refreshes, batch dispatches and failure paths
//! all cross a real HTTP boundary.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    extract::State,
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower::ServiceExt; // For oneshot()

use hookwell_proto::{CaptureBatchRequest, EndpointInfo, MockResponse};
use hookwell_receiver::{build_router, store_client::StoreClient, ReceiverState};

const SECRET: &str = "test-shared-secret";

#[derive(Clone, Default)]
struct StubStore {
    inner: Arc<StubInner>,
}

#[derive(Default)]
struct StubInner {
    info_calls: AtomicUsize,
    quota_calls: AtomicUsize,
    fail_endpoint: AtomicBool,
    fail_quota: AtomicBool,
    endpoint_reply: Mutex<serde_json::Value>,
    quota_reply: Mutex<serde_json::Value>,
    batches: Mutex<Vec<CaptureBatchRequest>>,
}

impl StubStore {
    fn new() -> Self {
        let stub = Self::default();
        stub.set_endpoint_reply(json!({"error": "not_found"}));
        stub.set_quota_reply(json!({"ownerId": null, "remaining": -1, "limit": -1}));
        stub
    }

    fn set_endpoint_reply(&self, value: serde_json::Value) {
        *self.inner.endpoint_reply.lock().unwrap() = value;
    }

    fn set_quota_reply(&self, value: serde_json::Value) {
        *self.inner.quota_reply.lock().unwrap() = value;
    }

    fn endpoint(&self, slug: &str, mock: Option<MockResponse>, expires_at: Option<i64>) {
        let info = EndpointInfo {
            endpoint_id: format!("ep-{slug}"),
            owner_id: None,
            is_ephemeral: false,
            expires_at,
            mock_response: mock,
        };
        self.set_endpoint_reply(serde_json::to_value(info).unwrap());
    }

    fn batches(&self) -> Vec<CaptureBatchRequest> {
        self.inner.batches.lock().unwrap().clone()
    }

    async fn wait_for_requests(&self, expected: usize) -> Vec<CaptureBatchRequest> {
        for _ in 0..300 {
            let batches = self.batches();
            let total: usize = batches.iter().map(|batch| batch.requests.len()).sum();
            if total >= expected {
                return batches;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("stub store never received {expected} captured requests");
    }
}

async fn stub_endpoint_info(State(stub): State<StubStore>) -> Response {
    stub.inner.info_calls.fetch_add(1, Ordering::SeqCst);
    if stub.inner.fail_endpoint.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(stub.inner.endpoint_reply.lock().unwrap().clone()).into_response()
}

async fn stub_quota(State(stub): State<StubStore>) -> Response {
    stub.inner.quota_calls.fetch_add(1, Ordering::SeqCst);
    if stub.inner.fail_quota.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Json(stub.inner.quota_reply.lock().unwrap().clone()).into_response()
}

async fn stub_capture_batch(
    State(stub): State<StubStore>,
    Json(batch): Json<CaptureBatchRequest>,
) -> Json<serde_json::Value> {
    let inserted = batch.requests.len();
    stub.inner.batches.lock().unwrap().push(batch);
    Json(json!({"success": true, "inserted": inserted}))
}

/// Spawn the stub store on an ephemeral port, returning its base URL.
async fn spawn_stub(stub: StubStore) -> String {
    let app = Router::new()
        .route("/endpoint-info", get(stub_endpoint_info))
        .route("/quota", get(stub_quota))
        .route("/capture-batch", post(stub_capture_batch))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn setup(stub: &StubStore) -> (Router, Arc<ReceiverState>) {
    let base_url = spawn_stub(stub.clone()).await;
    let client = Arc::new(StoreClient::new(&base_url, Some(SECRET.to_string())).unwrap());
    let state = ReceiverState::new(client, Some(SECRET.to_string()));
    let peer: SocketAddr = "198.51.100.7:4242".parse().unwrap();
    let app = build_router(state.clone()).layer(MockConnectInfo(peer));
    (app, state)
}

async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    let stub = StubStore::new();
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, r#"{"status":"ok"}"#);
}

#[tokio::test]
async fn unknown_slug_is_404_and_never_captured() {
    let stub = StubStore::new(); // endpoint-info answers not_found
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/w/nope/")
                .body(Body::from("ignored"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_string(response).await, "Endpoint not found");

    // No batcher enqueue, no capture call.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(stub.batches().is_empty());
}

#[tokio::test]
async fn invalid_slug_is_rejected_without_a_store_call() {
    let stub = StubStore::new();
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/w/bad%20slug/x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(stub.inner.info_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn mock_response_emission_and_capture() {
    let stub = StubStore::new();
    stub.endpoint(
        "abc",
        Some(MockResponse {
            status: 201,
            body: r#"{"ok":true}"#.to_string(),
            headers: BTreeMap::from([
                ("X-Mock".to_string(), "1".to_string()),
                ("Set-Cookie".to_string(), "a=b".to_string()),
            ]),
        }),
        None,
    );
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/w/abc/x?y=1")
                .header("x-real-ip", "203.0.113.9")
                .body(Body::from("hello"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers().get("x-mock").unwrap(), "1");
    assert!(response.headers().get("set-cookie").is_none());
    assert_eq!(body_string(response).await, r#"{"ok":true}"#);

    // The capture lands within the flush interval plus a round trip.
    let batches = stub.wait_for_requests(1).await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].slug, "abc");
    let captured = &batches[0].requests[0];
    assert_eq!(captured.method, "POST");
    assert_eq!(captured.path, "/x");
    assert_eq!(captured.query_params.get("y").map(String::as_str), Some("1"));
    assert_eq!(captured.body, "hello");
    assert_eq!(captured.body.len(), 5);
    assert_eq!(captured.ip, "203.0.113.9");
    assert!(captured.received_at > 0);
}

#[tokio::test]
async fn expired_endpoint_is_410() {
    let stub = StubStore::new();
    stub.endpoint("old", None, Some(1_000)); // long past
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/w/old/x")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GONE);
    assert_eq!(body_string(response).await, "Endpoint expired");
}

#[tokio::test]
async fn quota_exhaustion_returns_429() {
    let stub = StubStore::new();
    stub.endpoint("abc", None, None);
    stub.set_quota_reply(json!({
        "ownerId": "owner-1",
        "remaining": 1,
        "limit": 10,
        "periodEnd": 4_102_444_800_000i64,
    }));
    let (app, _state) = setup(&stub).await;

    let first = app
        .clone()
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(body_string(first).await, "OK");

    let second = app
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body_string(second).await, "Request limit exceeded");

    // Only the admitted request is captured.
    let batches = stub.wait_for_requests(1).await;
    let total: usize = batches.iter().map(|batch| batch.requests.len()).sum();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn quota_outage_fails_open() {
    let stub = StubStore::new();
    stub.endpoint("abc", None, None);
    stub.inner.fail_quota.store(true, Ordering::SeqCst);
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    stub.wait_for_requests(1).await;
}

#[tokio::test]
async fn endpoint_outage_without_cache_is_500() {
    let stub = StubStore::new();
    stub.inner.fail_endpoint.store(true, Ordering::SeqCst);
    let (app, _state) = setup(&stub).await;

    let response = app
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Internal server error");
}

#[tokio::test]
async fn cold_cache_issues_a_single_endpoint_fetch() {
    let stub = StubStore::new();
    stub.endpoint("cold", None, None);
    let (app, _state) = setup(&stub).await;

    let mut handles = Vec::new();
    for _ in 0..1000 {
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            app.oneshot(
                Request::builder()
                    .uri("/w/cold/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }

    assert_eq!(stub.inner.info_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.inner.quota_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_flushes_every_pending_buffer() {
    let stub = StubStore::new();
    stub.endpoint("s1", None, None);
    let (_app, state) = setup(&stub).await;

    // 25 requests across 3 slugs, straight into the batcher.
    let slugs = ["s1", "s2", "s3"];
    for i in 0..25 {
        let slug = slugs[i % slugs.len()];
        state.batcher.add(
            slug,
            hookwell_proto::BufferedRequest {
                method: "POST".to_string(),
                path: "/".to_string(),
                headers: BTreeMap::new(),
                body: format!("{i}"),
                query_params: BTreeMap::new(),
                ip: String::new(),
                received_at: i as i64,
            },
        );
    }

    state.batcher.flush_all();
    assert!(state.batcher.wait_idle(Duration::from_secs(10)).await);

    let batches = stub.batches();
    let total: usize = batches.iter().map(|batch| batch.requests.len()).sum();
    assert_eq!(total, 25);

    // Within a slug, dispatch preserves enqueue order.
    for slug in slugs {
        let ordered: Vec<i64> = batches
            .iter()
            .filter(|batch| batch.slug == slug)
            .flat_map(|batch| batch.requests.iter().map(|request| request.received_at))
            .collect();
        let mut sorted = ordered.clone();
        sorted.sort_unstable();
        assert_eq!(ordered, sorted);
        assert!(!ordered.is_empty());
    }
}

#[tokio::test]
async fn size_trigger_flushes_midstream() {
    let stub = StubStore::new();
    let (_app, state) = setup(&stub).await;

    for i in 0..50 {
        state.batcher.add(
            "burst",
            hookwell_proto::BufferedRequest {
                method: "POST".to_string(),
                path: "/".to_string(),
                headers: BTreeMap::new(),
                body: String::new(),
                query_params: BTreeMap::new(),
                ip: String::new(),
                received_at: i,
            },
        );
    }

    // The 50th add flushes synchronously, no timer involved.
    let batches = stub.wait_for_requests(50).await;
    assert_eq!(batches[0].requests.len(), 50);
}

#[tokio::test]
async fn cache_invalidate_evicts_and_requires_the_secret() {
    let stub = StubStore::new();
    stub.endpoint(
        "abc",
        Some(MockResponse {
            status: 200,
            body: "v1".to_string(),
            headers: BTreeMap::new(),
        }),
        None,
    );
    let (app, _state) = setup(&stub).await;

    let first = app
        .clone()
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_string(first).await, "v1");

    // New configuration upstream; the cache still serves v1.
    stub.endpoint(
        "abc",
        Some(MockResponse {
            status: 200,
            body: "v2".to_string(),
            headers: BTreeMap::new(),
        }),
        None,
    );
    let cached = app
        .clone()
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_string(cached).await, "v1");

    // Wrong secret is rejected.
    let rejected = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cache-invalidate/abc")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    // Right secret evicts; the next hit refetches.
    let accepted = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/cache-invalidate/abc")
                .header(header::AUTHORIZATION, format!("Bearer {SECRET}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);

    let refreshed = app
        .oneshot(Request::builder().uri("/w/abc/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_string(refreshed).await, "v2");
    assert_eq!(stub.inner.info_calls.load(Ordering::SeqCst), 2);
}
