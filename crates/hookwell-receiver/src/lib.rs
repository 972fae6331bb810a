//! hookwell edge receiver
//!
//! A stateless HTTP front-end for webhook capture. Inbound requests at
//! `/w/{slug}` are resolved against the endpoint cache, admitted against
//! the quota cache, buffered into per-slug batches, and answered with the
//! endpoint's configured mock response. All store I/O happens off the hot
//! path: cache refreshes are single-flight, batches ship in background
//! tasks, and shutdown drains the batcher before the process exits.

pub mod batcher;
pub mod cache;
pub mod handlers;
pub mod store_client;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{any, get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use hookwell_proto::{ErrorKind, MAX_BODY_SIZE};

use batcher::{RequestBatcher, BATCH_FLUSH_INTERVAL, BATCH_MAX_SIZE};
use cache::{
    EndpointLookup, QuotaEntry, SingleFlightCache, ENDPOINT_CACHE_TTL, QUOTA_CACHE_TTL,
};
use store_client::{StoreClient, StoreClientError};

/// Long-lived receiver state: one store client, two caches, one batcher.
pub struct ReceiverState {
    pub client: Arc<StoreClient>,
    pub endpoint_cache: SingleFlightCache<EndpointLookup, Arc<StoreClientError>>,
    pub quota_cache: SingleFlightCache<QuotaEntry, Arc<StoreClientError>>,
    pub batcher: Arc<RequestBatcher>,
    /// Shared secret for the cache-invalidate hook.
    pub shared_secret: Option<String>,
}

impl ReceiverState {
    pub fn new(client: Arc<StoreClient>, shared_secret: Option<String>) -> Arc<Self> {
        let batcher = RequestBatcher::new(client.clone(), BATCH_MAX_SIZE, BATCH_FLUSH_INTERVAL);
        Arc::new(Self {
            client,
            endpoint_cache: SingleFlightCache::new(ENDPOINT_CACHE_TTL),
            quota_cache: SingleFlightCache::new(QUOTA_CACHE_TTL),
            batcher,
            shared_secret,
        })
    }

    /// Endpoint configuration for a slug, through the cache. Negative
    /// results (`not_found`) are cached as well.
    pub(crate) async fn endpoint_for(
        &self,
        slug: &str,
    ) -> Result<Option<Arc<EndpointLookup>>, Arc<StoreClientError>> {
        self.endpoint_cache
            .get_with(slug, || async {
                match self.client.endpoint_info(slug).await {
                    Ok(reply) => match reply.into_result() {
                        Ok(info) => Ok(Some(EndpointLookup::Found(info))),
                        Err(ErrorKind::NotFound) => Ok(Some(EndpointLookup::NotFound)),
                        Err(kind) => Err(Arc::new(StoreClientError::Rejected(kind))),
                    },
                    Err(error) => Err(Arc::new(error)),
                }
            })
            .await
    }

    /// Quota snapshot for a slug, through the cache. A `not_found` reply
    /// (endpoint vanished between caches) passes through uncached.
    pub(crate) async fn quota_for(
        &self,
        slug: &str,
    ) -> Result<Option<Arc<QuotaEntry>>, Arc<StoreClientError>> {
        self.quota_cache
            .get_with(slug, || async {
                match self.client.quota(slug).await {
                    Ok(reply) => match reply.into_result() {
                        Ok(info) => Ok(Some(QuotaEntry::from_info(info))),
                        Err(ErrorKind::NotFound) => Ok(None),
                        Err(kind) => Err(Arc::new(StoreClientError::Rejected(kind))),
                    },
                    Err(error) => Err(Arc::new(error)),
                }
            })
            .await
    }
}

/// Build the router with all routes
pub fn build_router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/cache-invalidate/{slug}", post(handlers::cache_invalidate))
        .route("/w/{slug}", any(handlers::handle_webhook_root))
        .route("/w/{slug}/", any(handlers::handle_webhook_root))
        .route("/w/{slug}/{*path}", any(handlers::handle_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
}
