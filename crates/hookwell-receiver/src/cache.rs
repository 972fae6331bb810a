//! TTL caches with single-flight refresh.
//!
//! Both caches the receiver keeps (endpoint configuration and owner quota)
//! share one implementation: a map of cached entries plus a map of
//! in-flight refreshes. At most one fetch per slug is ever outstanding;
//! concurrent readers of a stale slug wait on the same watch channel and
//! share its result. When a refresh fails and a previous entry exists, the
//! stale entry is served and the failure only logged.
//!
//! The mutex is never held across an await point: lock, decide, unlock,
//! then fetch or wait.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::warn;

use hookwell_proto::QuotaInfo;

/// How long endpoint configuration stays fresh.
pub const ENDPOINT_CACHE_TTL: Duration = Duration::from_secs(60);

/// How long quota snapshots stay fresh.
pub const QUOTA_CACHE_TTL: Duration = Duration::from_secs(30);

enum FlightState<T, E> {
    Pending,
    Done(Result<Option<Arc<T>>, E>),
}

enum FlightOutcome<T, E> {
    Done(Result<Option<Arc<T>>, E>),
    /// The fetching caller was dropped before reporting; retry.
    Aborted,
}

struct CacheEntry<T> {
    value: Arc<T>,
    last_sync: Instant,
}

struct CacheState<T, E> {
    entries: HashMap<String, CacheEntry<T>>,
    in_flight: HashMap<String, watch::Receiver<FlightState<T, E>>>,
}

enum Action<T, E> {
    Wait(watch::Receiver<FlightState<T, E>>, Option<Arc<T>>),
    Fetch(watch::Sender<FlightState<T, E>>, Option<Arc<T>>),
}

pub struct SingleFlightCache<T, E> {
    state: Mutex<CacheState<T, E>>,
    ttl: Duration,
}

impl<T, E: Clone> SingleFlightCache<T, E> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            }),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<T, E>> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Drop a slug's cached entry, forcing the next read to refresh.
    pub fn invalidate(&self, slug: &str) {
        self.lock().entries.remove(slug);
    }

    /// Look up `slug`, refreshing through `fetch` when the entry is absent
    /// or older than the TTL.
    ///
    /// `fetch` resolving to `Ok(Some(value))` caches the value; `Ok(None)`
    /// is passed through uncached (a lookup that is authoritative but not
    /// worth keeping). Errors fall back to the stale entry when one exists.
    pub async fn get_with<F, Fut>(&self, slug: &str, fetch: F) -> Result<Option<Arc<T>>, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        loop {
            let action = {
                let mut state = self.lock();
                if let Some(entry) = state.entries.get(slug) {
                    if entry.last_sync.elapsed() < self.ttl {
                        return Ok(Some(entry.value.clone()));
                    }
                }
                let stale = state.entries.get(slug).map(|entry| entry.value.clone());

                if let Some(rx) = state.in_flight.get(slug) {
                    Action::Wait(rx.clone(), stale)
                } else {
                    let (tx, rx) = watch::channel(FlightState::Pending);
                    state.in_flight.insert(slug.to_string(), rx);
                    Action::Fetch(tx, stale)
                }
            };

            match action {
                Action::Wait(mut rx, stale) => match await_flight(&mut rx).await {
                    FlightOutcome::Done(Ok(value)) => return Ok(value),
                    FlightOutcome::Done(Err(error)) => {
                        return self.stale_or_err(slug, stale, error);
                    }
                    FlightOutcome::Aborted => continue,
                },
                Action::Fetch(tx, stale) => {
                    // Remove the in-flight marker even if this future is
                    // dropped mid-fetch; waiters then observe a closed
                    // channel and retry.
                    let _guard = FlightGuard { cache: self, slug };

                    let result = fetch().await.map(|value| value.map(Arc::new));

                    if let Ok(Some(value)) = &result {
                        let mut state = self.lock();
                        state.entries.insert(
                            slug.to_string(),
                            CacheEntry {
                                value: value.clone(),
                                last_sync: Instant::now(),
                            },
                        );
                    }
                    let _ = tx.send(FlightState::Done(result.clone()));

                    return match result {
                        Ok(value) => Ok(value),
                        Err(error) => self.stale_or_err(slug, stale, error),
                    };
                }
            }
        }
    }

    fn stale_or_err(
        &self,
        slug: &str,
        stale: Option<Arc<T>>,
        error: E,
    ) -> Result<Option<Arc<T>>, E> {
        match stale {
            Some(value) => {
                warn!(slug, "cache refresh failed, serving stale entry");
                Ok(Some(value))
            }
            None => Err(error),
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.lock().entries.len()
    }
}

async fn await_flight<T, E: Clone>(
    rx: &mut watch::Receiver<FlightState<T, E>>,
) -> FlightOutcome<T, E> {
    loop {
        {
            let flight = rx.borrow();
            if let FlightState::Done(result) = &*flight {
                return FlightOutcome::Done(result.clone());
            }
        }
        if rx.changed().await.is_err() {
            // Sender dropped; a final value may still have landed.
            let flight = rx.borrow();
            return match &*flight {
                FlightState::Done(result) => FlightOutcome::Done(result.clone()),
                FlightState::Pending => FlightOutcome::Aborted,
            };
        }
    }
}

struct FlightGuard<'a, T, E> {
    cache: &'a SingleFlightCache<T, E>,
    slug: &'a str,
}

impl<T, E> Drop for FlightGuard<'_, T, E> {
    fn drop(&mut self) {
        let mut state = match self.cache.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.in_flight.remove(self.slug);
    }
}

/// What the endpoint cache stores per slug. Negative lookups are cached
/// too, so unknown slugs do not hammer the store for a full TTL.
pub enum EndpointLookup {
    Found(hookwell_proto::EndpointInfo),
    NotFound,
}

/// Cached quota snapshot. `remaining` is atomic so the ingest path can
/// check-and-consume without taking the cache lock.
pub struct QuotaEntry {
    pub owner_id: Option<String>,
    remaining: AtomicI64,
    pub limit: i64,
    pub period_end: Option<i64>,
    pub is_unlimited: bool,
}

impl QuotaEntry {
    pub fn from_info(info: QuotaInfo) -> Self {
        let is_unlimited = info.is_unlimited();
        Self {
            owner_id: info.owner_id,
            remaining: AtomicI64::new(info.remaining),
            limit: info.limit,
            period_end: info.period_end,
            is_unlimited,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining.load(Ordering::Acquire)
    }

    /// Consume one unit of quota. Returns false when the budget is
    /// exhausted; never drives `remaining` below zero, so two concurrent
    /// requests racing on the last unit admit exactly one.
    pub fn try_consume(&self) -> bool {
        if self.is_unlimited {
            return true;
        }
        let mut current = self.remaining.load(Ordering::Acquire);
        loop {
            if current <= 0 {
                return false;
            }
            match self.remaining.compare_exchange(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    struct FetchFailed;

    #[tokio::test]
    async fn fresh_entries_skip_the_fetcher() {
        let cache: SingleFlightCache<u32, FetchFailed> =
            SingleFlightCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..5 {
            let value = cache
                .get_with("slug", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(Some(7)) }
                })
                .await
                .unwrap()
                .unwrap();
            assert_eq!(*value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entries_refresh() {
        let cache: SingleFlightCache<u32, FetchFailed> =
            SingleFlightCache::new(Duration::from_millis(10));

        let first = cache
            .get_with("slug", || async { Ok(Some(1)) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*first, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = cache
            .get_with("slug", || async { Ok(Some(2)) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*second, 2);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let cache: Arc<SingleFlightCache<u32, FetchFailed>> =
            Arc::new(SingleFlightCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..1000 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_with("cold", move || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            // Hold the flight open long enough for every
                            // waiter to pile onto it.
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(Some(42))
                        }
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Every waiter observes the same shared instance.
        let first = results[0].clone();
        for value in &results {
            assert!(Arc::ptr_eq(value, &first));
        }
    }

    #[tokio::test]
    async fn refresh_failure_serves_stale_entry() {
        let cache: SingleFlightCache<u32, FetchFailed> =
            SingleFlightCache::new(Duration::from_millis(10));

        cache
            .get_with("slug", || async { Ok(Some(1)) })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let value = cache
            .get_with("slug", || async { Err(FetchFailed) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*value, 1);
    }

    #[tokio::test]
    async fn refresh_failure_without_prior_value_surfaces() {
        let cache: SingleFlightCache<u32, FetchFailed> =
            SingleFlightCache::new(Duration::from_secs(60));

        let result = cache.get_with("slug", || async { Err(FetchFailed) }).await;
        assert_eq!(result.unwrap_err(), FetchFailed);
        assert_eq!(cache.entry_count(), 0);
    }

    #[tokio::test]
    async fn none_results_pass_through_uncached() {
        let cache: SingleFlightCache<u32, FetchFailed> =
            SingleFlightCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_with("slug", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(None) }
                })
                .await
                .unwrap();
            assert!(value.is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let cache: SingleFlightCache<u32, FetchFailed> =
            SingleFlightCache::new(Duration::from_secs(60));

        cache
            .get_with("slug", || async { Ok(Some(1)) })
            .await
            .unwrap();
        cache.invalidate("slug");

        let value = cache
            .get_with("slug", || async { Ok(Some(2)) })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*value, 2);
    }

    #[test]
    fn try_consume_clamps_at_zero() {
        let entry = QuotaEntry::from_info(QuotaInfo {
            owner_id: Some("owner".into()),
            remaining: 1,
            limit: 10,
            period_end: None,
        });

        assert!(entry.try_consume());
        assert!(!entry.try_consume());
        assert!(!entry.try_consume());
        assert_eq!(entry.remaining(), 0);
    }

    #[test]
    fn unlimited_quota_always_admits() {
        let entry = QuotaEntry::from_info(QuotaInfo::unlimited());
        for _ in 0..100 {
            assert!(entry.try_consume());
        }
        assert_eq!(entry.remaining(), -1);
    }

    #[tokio::test]
    async fn concurrent_consumers_admit_exactly_remaining() {
        let entry = Arc::new(QuotaEntry::from_info(QuotaInfo {
            owner_id: Some("owner".into()),
            remaining: 10,
            limit: 10,
            period_end: None,
        }));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let entry = entry.clone();
            handles.push(tokio::spawn(async move { entry.try_consume() }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        assert_eq!(entry.remaining(), 0);
    }
}
