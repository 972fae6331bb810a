//! hookwell store service
//!
//! The system of record behind the edge receiver. Exposes the
//! shared-secret-authenticated capture surface (`/capture`,
//! `/capture-batch`), the lookup surface the receiver's caches refresh from
//! (`/quota`, `/endpoint-info`), and endpoint creation. Persistence goes
//! through `hookwell-store-db`; owner usage accounting runs on per-owner
//! queues so capture writes never contend on the owner row.

pub mod auth;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod usage;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use sea_orm::DatabaseConnection;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use hookwell_proto::{MAX_BATCH_BODY_SIZE, MAX_STORE_BODY_SIZE};
use usage::UsageLedger;

/// Application state shared across handlers
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: StoreConfig,
    pub usage: UsageLedger,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: StoreConfig) -> Arc<Self> {
        let usage = UsageLedger::new(db.clone(), config.billing_period_ms);
        Arc::new(Self { db, config, usage })
    }
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Bearer secret required on the capture/lookup surface; the store
    /// fails closed when unset.
    pub capture_shared_secret: Option<String>,
    pub free_request_limit: i64,
    pub pro_request_limit: i64,
    pub ephemeral_ttl_ms: i64,
    pub billing_period_ms: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capture_shared_secret: None,
            free_request_limit: 500,
            pro_request_limit: 500_000,
            ephemeral_ttl_ms: 600_000,
            billing_period_ms: 2_592_000_000,
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "hookwell store API",
        description = "Internal capture, quota and endpoint lookup surface consumed by the edge receiver"
    ),
    paths(
        handlers::health,
        handlers::capture,
        handlers::capture_batch,
        handlers::quota,
        handlers::endpoint_info,
        handlers::create_endpoint,
    ),
    components(schemas(
        hookwell_proto::BufferedRequest,
        hookwell_proto::CaptureBatchRequest,
        hookwell_proto::CaptureOutcome,
        hookwell_proto::EndpointInfo,
        hookwell_proto::ErrorBody,
        hookwell_proto::ErrorKind,
        hookwell_proto::MockResponse,
        hookwell_proto::QuotaInfo,
        models::CaptureFailure,
        models::CaptureRequest,
        models::CreateEndpointRequest,
        models::CreateEndpointResponse,
        models::HealthResponse,
    )),
    tags(
        (name = "capture", description = "Capture persistence endpoints"),
        (name = "lookup", description = "Cache refresh endpoints for the receiver"),
        (name = "endpoints", description = "Endpoint lifecycle"),
        (name = "system", description = "System health and info endpoints")
    )
)]
struct ApiDoc;

async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the router with all routes
pub fn build_router(state: Arc<AppState>) -> Router {
    // Public routes: health and the OpenAPI document.
    let public_router = Router::new()
        .route("/health", get(handlers::health))
        .route("/api/openapi.json", get(openapi_spec));

    // Everything else sits behind the shared secret. A full batch at the
    // receiver's per-request body cap far exceeds the default store limit,
    // so the batch route carries its own.
    let protected_router = Router::new()
        .route("/capture", post(handlers::capture))
        .route(
            "/capture-batch",
            post(handlers::capture_batch).layer(DefaultBodyLimit::max(MAX_BATCH_BODY_SIZE)),
        )
        .route("/quota", get(handlers::quota))
        .route("/endpoint-info", get(handlers::endpoint_info))
        .route("/endpoints", post(handlers::create_endpoint))
        .with_state(state.clone())
        .layer(axum_middleware::from_fn_with_state(
            state,
            auth::require_shared_secret,
        ));

    public_router
        .merge(protected_router)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(DefaultBodyLimit::max(MAX_STORE_BODY_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        // Ensure OpenAPI spec can be generated without panics
        let _api_doc = ApiDoc::openapi();
    }
}
