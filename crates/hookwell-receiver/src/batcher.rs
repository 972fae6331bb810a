//! Per-slug request batching.
//!
//! Accepted requests are buffered per slug and shipped to the store in
//! batches, triggered either by size (`BATCH_MAX_SIZE`) or by a flush timer
//! re-armed on every add so bursts coalesce. Dispatches run detached from
//! the inbound request with the client's own timeout; failures are logged
//! and the batch is dropped, because a retry against the store's
//! non-idempotent capture path would duplicate rows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use hookwell_proto::{BufferedRequest, StoreReply};

use crate::store_client::StoreClient;

/// Flush as soon as a slug's buffer reaches this many requests.
pub const BATCH_MAX_SIZE: usize = 50;

/// Flush this long after the first enqueue into an idle buffer.
pub const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// How long shutdown waits for in-flight dispatches.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

struct BatcherInner {
    buffers: HashMap<String, Vec<BufferedRequest>>,
    timers: HashMap<String, JoinHandle<()>>,
    dispatches: Vec<JoinHandle<()>>,
}

pub struct RequestBatcher {
    client: Arc<StoreClient>,
    max_size: usize,
    interval: Duration,
    inner: Mutex<BatcherInner>,
}

impl RequestBatcher {
    pub fn new(client: Arc<StoreClient>, max_size: usize, interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            client,
            max_size,
            interval,
            inner: Mutex::new(BatcherInner {
                buffers: HashMap::new(),
                timers: HashMap::new(),
                dispatches: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BatcherInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Buffer a request for a slug. Never fails and never suspends: the
    /// request has already been accepted.
    pub fn add(self: &Arc<Self>, slug: &str, request: BufferedRequest) {
        let mut inner = self.lock();

        let buffer = inner.buffers.entry(slug.to_string()).or_default();
        buffer.push(request);

        if buffer.len() >= self.max_size {
            self.flush_locked(&mut inner, slug);
            return;
        }

        // Re-arm the timer. Aborting a timer that already entered flush is
        // harmless: flush waits on this mutex, so by the time the abort
        // lands its dispatch has either been spawned or the buffer is
        // still here for the timer we arm now.
        if let Some(timer) = inner.timers.remove(slug) {
            timer.abort();
        }
        let batcher = Arc::clone(self);
        let timer_slug = slug.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(batcher.interval).await;
            batcher.flush(&timer_slug);
        });
        inner.timers.insert(slug.to_string(), timer);
    }

    /// Flush a slug's buffer to the store.
    pub fn flush(&self, slug: &str) {
        let mut inner = self.lock();
        self.flush_locked(&mut inner, slug);
    }

    fn flush_locked(&self, inner: &mut BatcherInner, slug: &str) {
        let Some(requests) = inner.buffers.remove(slug) else {
            return;
        };
        if requests.is_empty() {
            return;
        }

        if let Some(timer) = inner.timers.remove(slug) {
            timer.abort();
        }

        inner.dispatches.retain(|dispatch| !dispatch.is_finished());

        let client = self.client.clone();
        let slug = slug.to_string();
        let dispatch = tokio::spawn(async move {
            let count = requests.len();
            match client.capture_batch(&slug, requests).await {
                Ok(StoreReply::Ok(outcome)) => {
                    info!(slug, inserted = outcome.inserted, "batch captured");
                }
                Ok(StoreReply::Err(body)) => {
                    warn!(slug, count, error = %body.error, "store rejected batch");
                }
                Err(error) => {
                    warn!(slug, count, %error, "batch capture failed");
                }
            }
        });
        inner.dispatches.push(dispatch);
    }

    /// Flush every pending buffer (graceful shutdown).
    pub fn flush_all(&self) {
        let mut inner = self.lock();
        let slugs: Vec<String> = inner.buffers.keys().cloned().collect();
        for slug in slugs {
            self.flush_locked(&mut inner, &slug);
        }
    }

    /// Wait for all in-flight dispatches, up to `timeout`. Returns false if
    /// the deadline passed with dispatches still outstanding.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let dispatches: Vec<JoinHandle<()>> = {
            let mut inner = self.lock();
            inner.dispatches.drain(..).collect()
        };

        let join_all = async {
            for dispatch in dispatches {
                let _ = dispatch.await;
            }
        };
        tokio::time::timeout(timeout, join_all).await.is_ok()
    }
}
