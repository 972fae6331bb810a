//! HTTP handlers for the store surface.
//!
//! Capture rejections that a healthy receiver must distinguish from
//! transport faults (`not_found`, `expired`) are returned with HTTP 200 and
//! an error body; validation problems are 400s; everything else follows the
//! wire taxonomy in `hookwell-proto`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, TransactionTrait,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use hookwell_proto::{
    is_valid_slug, BufferedRequest, CaptureBatchRequest, CaptureOutcome, EndpointInfo, ErrorBody,
    ErrorKind, MockResponse, QuotaInfo,
};
use hookwell_store_db::entities::{captured_request, endpoint, owner};

use crate::models::{
    CaptureFailure, CaptureRequest, CreateEndpointRequest, CreateEndpointResponse, HealthResponse,
    SlugQuery,
};
use crate::{validation, AppState};

type ApiError = (StatusCode, Json<ErrorBody>);

fn reject(status: StatusCode, kind: ErrorKind) -> ApiError {
    (status, Json(ErrorBody::new(kind)))
}

fn db_error(error: DbErr) -> ApiError {
    error!(%error, "database error");
    reject(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal)
}

/// Endpoints are live strictly before `expires_at`; expiry at exactly `now`
/// counts as expired.
fn is_live(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(expires_at) => now < expires_at,
        None => true,
    }
}

async fn find_by_slug(
    db: &DatabaseConnection,
    slug: &str,
) -> Result<Option<endpoint::Model>, ApiError> {
    endpoint::Entity::find()
        .filter(endpoint::Column::Slug.eq(slug))
        .one(db)
        .await
        .map_err(db_error)
}

fn parse_mock_response(model: &endpoint::Model) -> Option<MockResponse> {
    let raw = model.mock_response.as_deref()?;
    match serde_json::from_str(raw) {
        Ok(mock) => Some(mock),
        Err(error) => {
            warn!(slug = %model.slug, %error, "stored mock response is malformed");
            None
        }
    }
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Persist a batch of requests captured at the edge
#[utoipa::path(
    post,
    path = "/capture-batch",
    request_body = CaptureBatchRequest,
    responses(
        (status = 200, description = "Batch stored (or rejected with an error body)", body = CaptureOutcome),
        (status = 400, description = "Validation failure", body = ErrorBody),
        (status = 401, description = "Missing or invalid shared secret", body = ErrorBody),
        (status = 413, description = "Payload over the batch cap", body = ErrorBody)
    ),
    tag = "capture"
)]
pub async fn capture_batch(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidJson))?;
    let batch: CaptureBatchRequest = serde_json::from_value(value)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequests))?;

    validation::validate_batch(&batch.slug, batch.requests.len())
        .map_err(|kind| reject(StatusCode::BAD_REQUEST, kind))?;

    let Some(endpoint) = find_by_slug(&state.db, &batch.slug).await? else {
        return Ok(Json(CaptureFailure::new(ErrorKind::NotFound)).into_response());
    };
    if !is_live(endpoint.expires_at, Utc::now()) {
        return Ok(Json(CaptureFailure::new(ErrorKind::Expired)).into_response());
    }

    let inserted = insert_requests(&state.db, &endpoint, &batch.requests, None)
        .await
        .map_err(db_error)?;

    if let Some(owner_id) = endpoint.owner_id {
        if inserted > 0 {
            state.usage.schedule(owner_id, inserted);
        }
    }

    info!(slug = %batch.slug, inserted, "captured batch");
    Ok(Json(CaptureOutcome {
        success: true,
        inserted,
        mock_response: None,
    })
    .into_response())
}

/// Persist a single request (legacy, non-batched path)
#[utoipa::path(
    post,
    path = "/capture",
    request_body = CaptureRequest,
    responses(
        (status = 200, description = "Request stored (or rejected with an error body)", body = CaptureOutcome),
        (status = 400, description = "Validation failure", body = ErrorBody),
        (status = 401, description = "Missing or invalid shared secret", body = ErrorBody),
        (status = 413, description = "Body over the 1 MiB cap", body = ErrorBody)
    ),
    tag = "capture"
)]
pub async fn capture(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidJson))?;
    let capture: CaptureRequest = serde_json::from_value(value)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequests))?;

    validation::validate_capture(&capture).map_err(|kind| {
        let status = match kind {
            ErrorKind::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        reject(status, kind)
    })?;

    let Some(endpoint) = find_by_slug(&state.db, &capture.slug).await? else {
        return Ok(Json(CaptureFailure::new(ErrorKind::NotFound)).into_response());
    };
    let now = Utc::now();
    if !is_live(endpoint.expires_at, now) {
        return Ok(Json(CaptureFailure::new(ErrorKind::Expired)).into_response());
    }

    // The single path timestamps server-side.
    let buffered = BufferedRequest {
        method: capture.method,
        path: capture.path,
        headers: capture.headers,
        body: capture.body.unwrap_or_default(),
        query_params: capture.query_params,
        ip: capture.ip,
        received_at: now.timestamp_millis(),
    };

    let inserted = insert_requests(&state.db, &endpoint, std::slice::from_ref(&buffered), Some(now))
        .await
        .map_err(db_error)?;

    if let Some(owner_id) = endpoint.owner_id {
        state.usage.schedule(owner_id, inserted);
    }

    let mock_response = parse_mock_response(&endpoint);
    Ok(Json(CaptureOutcome {
        success: true,
        inserted,
        mock_response,
    })
    .into_response())
}

/// Insert rows for one slug inside a single transaction, bumping the
/// endpoint's denormalized counter alongside. The owner's quota counter is
/// deliberately not touched here; see `UsageLedger`.
async fn insert_requests(
    db: &DatabaseConnection,
    endpoint: &endpoint::Model,
    requests: &[BufferedRequest],
    received_at_override: Option<DateTime<Utc>>,
) -> Result<u64, DbErr> {
    if requests.is_empty() {
        return Ok(0);
    }

    let fallback = Utc::now();
    let rows: Vec<captured_request::ActiveModel> = requests
        .iter()
        .map(|request| {
            let received_at = received_at_override
                .or_else(|| DateTime::from_timestamp_millis(request.received_at))
                .unwrap_or(fallback);
            captured_request::ActiveModel {
                id: Set(Uuid::new_v4().simple().to_string()),
                endpoint_id: Set(endpoint.id.clone()),
                method: Set(request.method.clone()),
                path: Set(request.path.clone()),
                headers: Set(serde_json::to_string(&request.headers)
                    .unwrap_or_else(|_| "{}".to_string())),
                body: Set((!request.body.is_empty()).then(|| request.body.clone())),
                query_params: Set(serde_json::to_string(&request.query_params)
                    .unwrap_or_else(|_| "{}".to_string())),
                content_type: Set(validation::content_type_of(&request.headers)),
                ip: Set(request.ip.clone()),
                size: Set(request.body.len() as i64),
                received_at: Set(received_at),
            }
        })
        .collect();

    let inserted = rows.len() as u64;

    let txn = db.begin().await?;
    captured_request::Entity::insert_many(rows).exec(&txn).await?;
    endpoint::Entity::update_many()
        .col_expr(
            endpoint::Column::RequestCount,
            Expr::col(endpoint::Column::RequestCount).add(inserted as i64),
        )
        .filter(endpoint::Column::Id.eq(endpoint.id.clone()))
        .exec(&txn)
        .await?;
    txn.commit().await?;

    Ok(inserted)
}

/// Remaining request budget for the owner behind a slug
#[utoipa::path(
    get,
    path = "/quota",
    params(("slug" = String, Query, description = "Endpoint slug")),
    responses(
        (status = 200, description = "Quota snapshot (remaining = -1 means unlimited)", body = QuotaInfo),
        (status = 400, description = "Invalid slug", body = ErrorBody),
        (status = 401, description = "Missing or invalid shared secret", body = ErrorBody)
    ),
    tag = "lookup"
)]
pub async fn quota(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlugQuery>,
) -> Result<Response, ApiError> {
    if !is_valid_slug(&query.slug) {
        return Err(reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidSlug));
    }

    let Some(endpoint) = find_by_slug(&state.db, &query.slug).await? else {
        return Ok(Json(ErrorBody::new(ErrorKind::NotFound)).into_response());
    };

    if endpoint.is_ephemeral {
        return Ok(Json(QuotaInfo::unlimited()).into_response());
    }
    let Some(owner_id) = endpoint.owner_id else {
        return Ok(Json(QuotaInfo::unlimited()).into_response());
    };

    let record = owner::Entity::find_by_id(owner_id)
        .one(&state.db)
        .await
        .map_err(db_error)?;
    let Some(record) = record else {
        return Ok(Json(QuotaInfo::unlimited()).into_response());
    };

    Ok(Json(QuotaInfo {
        owner_id: Some(record.id.to_string()),
        remaining: record.request_limit - record.requests_used,
        limit: record.request_limit,
        period_end: record.period_end.map(|t| t.timestamp_millis()),
    })
    .into_response())
}

/// Endpoint configuration for the receiver's cache
#[utoipa::path(
    get,
    path = "/endpoint-info",
    params(("slug" = String, Query, description = "Endpoint slug")),
    responses(
        (status = 200, description = "Endpoint configuration", body = EndpointInfo),
        (status = 400, description = "Invalid slug", body = ErrorBody),
        (status = 401, description = "Missing or invalid shared secret", body = ErrorBody)
    ),
    tag = "lookup"
)]
pub async fn endpoint_info(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SlugQuery>,
) -> Result<Response, ApiError> {
    if !is_valid_slug(&query.slug) {
        return Err(reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidSlug));
    }

    let Some(endpoint) = find_by_slug(&state.db, &query.slug).await? else {
        return Ok(Json(ErrorBody::new(ErrorKind::NotFound)).into_response());
    };

    let mock_response = parse_mock_response(&endpoint);
    Ok(Json(EndpointInfo {
        endpoint_id: endpoint.id,
        owner_id: endpoint.owner_id.map(|id| id.to_string()),
        is_ephemeral: endpoint.is_ephemeral,
        expires_at: endpoint.expires_at.map(|t| t.timestamp_millis()),
        mock_response,
    })
    .into_response())
}

/// Create a capture endpoint (anonymous ephemeral or owner-bound)
#[utoipa::path(
    post,
    path = "/endpoints",
    request_body = CreateEndpointRequest,
    responses(
        (status = 200, description = "Endpoint created", body = CreateEndpointResponse),
        (status = 400, description = "Validation failure", body = ErrorBody),
        (status = 401, description = "Missing or invalid shared secret", body = ErrorBody),
        (status = 409, description = "Slug already in use", body = ErrorBody)
    ),
    tag = "endpoints"
)]
pub async fn create_endpoint(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidJson))?;
    let request: CreateEndpointRequest = serde_json::from_value(value)
        .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequests))?;

    let slug = match request.slug {
        Some(slug) => {
            if !is_valid_slug(&slug) {
                return Err(reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidSlug));
            }
            slug
        }
        None => Uuid::new_v4().simple().to_string(),
    };

    let owner_id = match request.owner_id.as_deref() {
        Some(raw) => Some(
            raw.parse::<Uuid>()
                .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequests))?,
        ),
        None => None,
    };
    if !request.ephemeral && owner_id.is_none() {
        // Non-ephemeral endpoints must be owned.
        return Err(reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequests));
    }

    if find_by_slug(&state.db, &slug).await?.is_some() {
        return Err(reject(StatusCode::CONFLICT, ErrorKind::SlugTaken));
    }

    let now = Utc::now();
    let expires_at = request
        .ephemeral
        .then(|| now + Duration::milliseconds(state.config.ephemeral_ttl_ms));
    let mock_response = match request.mock_response {
        Some(mock) => Some(
            serde_json::to_string(&mock)
                .map_err(|_| reject(StatusCode::BAD_REQUEST, ErrorKind::InvalidRequests))?,
        ),
        None => None,
    };

    let model = endpoint::ActiveModel {
        id: Set(Uuid::new_v4().simple().to_string()),
        slug: Set(slug.clone()),
        owner_id: Set(owner_id),
        name: Set(request.name),
        mock_response: Set(mock_response),
        is_ephemeral: Set(request.ephemeral),
        expires_at: Set(expires_at),
        request_count: Set(0),
        created_at: Set(now),
    }
    .insert(&state.db)
    .await
    .map_err(db_error)?;

    info!(slug = %model.slug, ephemeral = model.is_ephemeral, "endpoint created");
    Ok(Json(CreateEndpointResponse {
        endpoint_id: model.id,
        slug: model.slug,
        expires_at: model.expires_at.map(|t| t.timestamp_millis()),
    })
    .into_response())
}
