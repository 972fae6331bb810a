//! Request/response bodies specific to the store surface.
//!
//! The shared wire shapes (captures, quota, endpoint info, error kinds)
//! live in `hookwell-proto`; this module only adds the store-side request
//! models and the replies that carry extra bookkeeping fields.

use hookwell_proto::{ErrorKind, MockResponse};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

/// Body of `POST /capture` (single, non-batched path).
///
/// `received_at` is assigned server-side, so the shape carries none.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub slug: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    pub ip: String,
}

/// Failure reply for the capture paths: `{error, inserted: 0}`.
///
/// Returned with HTTP 200 for `not_found`/`expired` so callers distinguish
/// transport failures from store-side rejections.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CaptureFailure {
    pub error: ErrorKind,
    pub inserted: u64,
}

impl CaptureFailure {
    pub fn new(error: ErrorKind) -> Self {
        Self { error, inserted: 0 }
    }
}

/// Body of `POST /endpoints`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpointRequest {
    /// Random slug assigned when omitted.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mock_response: Option<MockResponse>,
    /// Ephemeral endpoints get `expires_at = now + EPHEMERAL_TTL_MS` and no
    /// owner.
    #[serde(default = "default_ephemeral")]
    pub ephemeral: bool,
    #[serde(default)]
    pub owner_id: Option<String>,
}

fn default_ephemeral() -> bool {
    true
}

/// Reply of `POST /endpoints`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEndpointResponse {
    pub endpoint_id: String,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Reply of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// `?slug=` query used by `/quota` and `/endpoint-info`.
#[derive(Debug, Clone, Deserialize)]
pub struct SlugQuery {
    pub slug: String,
}
