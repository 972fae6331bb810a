//! HTTP client for the store.
//!
//! One pooled client shared by the whole process. Lookup calls (endpoint
//! info, quota) run through an in-process circuit breaker so a down store
//! fails fast instead of stacking 10 s timeouts on every cache miss; batch
//! dispatches bypass the breaker because they are already drop-on-error.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use hookwell_proto::{
    BufferedRequest, CaptureBatchRequest, CaptureOutcome, EndpointInfo, ErrorKind, QuotaInfo,
    StoreReply, MAX_STORE_BODY_SIZE,
};

/// Client timeout shared by every call to the store.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive lookup failures before the circuit opens.
const FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects lookups before probing again.
const COOLDOWN: Duration = Duration::from_secs(30);

/// Store client errors
#[derive(Debug, Error)]
pub enum StoreClientError {
    #[error("failed to reach store: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("store returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("store response exceeded {MAX_STORE_BODY_SIZE} bytes")]
    ResponseTooLarge,

    #[error("failed to parse store response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("store rejected request: {0}")]
    Rejected(ErrorKind),

    #[error("store lookups suspended, circuit breaker open")]
    CircuitOpen,
}

pub struct StoreClient {
    http: reqwest::Client,
    base_url: String,
    shared_secret: Option<String>,
    breaker: CircuitBreaker,
}

impl StoreClient {
    pub fn new(
        base_url: &str,
        shared_secret: Option<String>,
    ) -> Result<Self, StoreClientError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .pool_max_idle_per_host(100)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            shared_secret,
            breaker: CircuitBreaker::new(),
        })
    }

    /// `GET /endpoint-info?slug=…`, breaker-guarded.
    pub async fn endpoint_info(
        &self,
        slug: &str,
    ) -> Result<StoreReply<EndpointInfo>, StoreClientError> {
        self.lookup("/endpoint-info", slug).await
    }

    /// `GET /quota?slug=…`, breaker-guarded.
    pub async fn quota(&self, slug: &str) -> Result<StoreReply<QuotaInfo>, StoreClientError> {
        self.lookup("/quota", slug).await
    }

    /// `POST /capture-batch`. Not breaker-guarded: a failed dispatch is
    /// logged and dropped by the batcher, never retried.
    pub async fn capture_batch(
        &self,
        slug: &str,
        requests: Vec<BufferedRequest>,
    ) -> Result<StoreReply<CaptureOutcome>, StoreClientError> {
        let payload = CaptureBatchRequest {
            slug: slug.to_string(),
            requests,
        };

        let mut request = self
            .http
            .post(format!("{}/capture-batch", self.base_url))
            .json(&payload);
        if let Some(secret) = &self.shared_secret {
            request = request.bearer_auth(secret);
        }

        self.read_reply(request.send().await?).await
    }

    async fn lookup<T: DeserializeOwned>(
        &self,
        path: &str,
        slug: &str,
    ) -> Result<StoreReply<T>, StoreClientError> {
        if !self.breaker.allow_request() {
            return Err(StoreClientError::CircuitOpen);
        }

        let result = self.fetch(path, slug).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        path: &str,
        slug: &str,
    ) -> Result<StoreReply<T>, StoreClientError> {
        let mut request = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(&[("slug", slug)]);
        if let Some(secret) = &self.shared_secret {
            request = request.bearer_auth(secret);
        }

        self.read_reply(request.send().await?).await
    }

    async fn read_reply<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<StoreReply<T>, StoreClientError> {
        let status = response.status();
        let body = read_limited(response).await?;

        if !status.is_success() {
            return Err(StoreClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

/// Read a response body, refusing anything over `MAX_STORE_BODY_SIZE`.
async fn read_limited(mut response: reqwest::Response) -> Result<Vec<u8>, StoreClientError> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_STORE_BODY_SIZE {
            return Err(StoreClientError::ResponseTooLarge);
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// In-process circuit breaker for store lookups.
///
/// closed -> open after `FAILURE_THRESHOLD` consecutive failures;
/// open -> half-open after `COOLDOWN`, admitting exactly one probe;
/// a successful probe closes the circuit, a failed one re-opens it.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_some_and(|opened_at| opened_at.elapsed() >= COOLDOWN);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
        inner.failures += 1;

        let reopen = inner.state == CircuitState::HalfOpen;
        if reopen || inner.failures >= FAILURE_THRESHOLD {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                failures = inner.failures,
                "store lookup circuit breaker opened"
            );
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.allow_request());

        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn breaker_closes_on_success() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }

    #[test]
    fn failures_below_threshold_keep_circuit_closed() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());
    }
}
