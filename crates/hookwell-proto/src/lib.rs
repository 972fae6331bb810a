//! Wire types for the receiver/store boundary.
//!
//! Everything that crosses the HTTP boundary between the edge receiver and
//! the store lives here: capture payloads, endpoint configuration, quota
//! snapshots and the error taxonomy. All JSON is camelCase on the wire.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Maximum number of requests in a single `/capture-batch` call.
pub const MAX_BATCH_SIZE: usize = 100;

/// Maximum inbound webhook body accepted by the receiver.
pub const MAX_BODY_SIZE: usize = 100 * 1024;

/// Maximum body accepted by (and read from) the store.
pub const MAX_STORE_BODY_SIZE: usize = 1024 * 1024;

/// Maximum payload accepted on the store's batch-capture path: a full
/// batch of requests, each at the receiver's inbound body cap, with room
/// for headers, query params and JSON framing.
pub const MAX_BATCH_BODY_SIZE: usize = MAX_BATCH_SIZE * (MAX_BODY_SIZE + 32 * 1024);

/// Slug length bounds (`^[A-Za-z0-9_-]{1,50}$`).
pub const MAX_SLUG_LEN: usize = 50;

/// Validation limits applied by the store's capture path.
pub const MAX_PATH_LEN: usize = 2048;
pub const MAX_IP_LEN: usize = 45;
pub const MAX_HEADER_COUNT: usize = 100;
pub const MAX_QUERY_PARAM_COUNT: usize = 100;

/// HTTP methods the store accepts on the single-capture path.
pub const ALLOWED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS",
];

/// Check a capture endpoint slug: 1..=50 chars of `[A-Za-z0-9_-]`.
pub fn is_valid_slug(slug: &str) -> bool {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return false;
    }
    slug.bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// The response an endpoint is configured to return to webhook senders.
///
/// `status` is kept as received; the receiver clamps out-of-range values to
/// 200 at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MockResponse {
    pub status: i64,
    pub body: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// A captured request buffered at the edge, waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BufferedRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,
    pub ip: String,
    /// Milliseconds since the unix epoch, assigned by the receiver.
    pub received_at: i64,
}

/// Body of `POST /capture-batch`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CaptureBatchRequest {
    pub slug: String,
    pub requests: Vec<BufferedRequest>,
}

/// Successful reply from `/capture` and `/capture-batch`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutcome {
    pub success: bool,
    pub inserted: u64,
    /// Only populated on the single-capture path, so non-caching edges can
    /// emit the configured response without a second round trip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_response: Option<MockResponse>,
}

/// Quota snapshot for the owner behind a slug.
///
/// `remaining = -1` means unlimited: the endpoint is ephemeral, has no
/// owner, or the owner record is missing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuotaInfo {
    pub owner_id: Option<String>,
    pub remaining: i64,
    pub limit: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<i64>,
}

impl QuotaInfo {
    /// The shape returned for ephemeral and owner-less endpoints.
    pub fn unlimited() -> Self {
        Self {
            owner_id: None,
            remaining: -1,
            limit: -1,
            period_end: None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.remaining == -1
    }
}

/// Endpoint configuration served by `/endpoint-info`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointInfo {
    pub endpoint_id: String,
    pub owner_id: Option<String>,
    pub is_ephemeral: bool,
    /// Milliseconds since the unix epoch; `None` means the endpoint never
    /// expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_response: Option<MockResponse>,
}

impl EndpointInfo {
    /// An endpoint is live until the instant of `expires_at`: expiry at
    /// exactly `now` counts as expired.
    pub fn is_live_at(&self, now_ms: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_ms < expires_at,
            None => true,
        }
    }
}

/// Error kinds crossing the store surface, serialized as `{"error": kind}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Expired,
    LimitExceeded,
    InvalidMethod,
    InvalidSlug,
    InvalidPath,
    InvalidIp,
    InvalidHeaders,
    InvalidQueryParams,
    InvalidJson,
    InvalidRequests,
    BatchTooLarge,
    BodyTooLarge,
    SlugTaken,
    Unauthorized,
    ServerMisconfiguration,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Reuse the serde name so logs match the wire format.
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        f.write_str(s.trim_matches('"'))
    }
}

/// The `{"error": kind}` body used for every store-side failure.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorKind,
}

impl ErrorBody {
    pub fn new(error: ErrorKind) -> Self {
        Self { error }
    }
}

/// A store reply is either an error body or the operation's payload.
///
/// Modeled as a tagged pair of shapes rather than free-form JSON; `Err` is
/// tried first so `{"error": ...}` bodies never half-match a payload type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreReply<T> {
    Err(ErrorBody),
    Ok(T),
}

impl<T> StoreReply<T> {
    pub fn into_result(self) -> Result<T, ErrorKind> {
        match self {
            StoreReply::Ok(value) => Ok(value),
            StoreReply::Err(body) => Err(body.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_length_bounds() {
        assert!(is_valid_slug("a"));
        assert!(is_valid_slug(&"x".repeat(50)));
        assert!(!is_valid_slug(""));
        assert!(!is_valid_slug(&"x".repeat(51)));
    }

    #[test]
    fn slug_character_set() {
        assert!(is_valid_slug("abc-DEF_123"));
        assert!(!is_valid_slug("no/slash"));
        assert!(!is_valid_slug("no space"));
        assert!(!is_valid_slug("no.dot"));
    }

    #[test]
    fn buffered_request_wire_format_is_camel_case() {
        let req = BufferedRequest {
            method: "POST".into(),
            path: "/x".into(),
            headers: BTreeMap::new(),
            body: "hello".into(),
            query_params: BTreeMap::from([("y".to_string(), "1".to_string())]),
            ip: "1.2.3.4".into(),
            received_at: 1_700_000_000_000,
        };

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["queryParams"]["y"], "1");
        assert_eq!(json["receivedAt"], 1_700_000_000_000i64);

        let back: BufferedRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn store_reply_decodes_error_bodies() {
        let reply: StoreReply<EndpointInfo> =
            serde_json::from_str(r#"{"error":"not_found","inserted":0}"#).unwrap();
        assert_eq!(reply.into_result().unwrap_err(), ErrorKind::NotFound);
    }

    #[test]
    fn store_reply_decodes_payloads() {
        let reply: StoreReply<EndpointInfo> = serde_json::from_str(
            r#"{"endpointId":"ep1","ownerId":null,"isEphemeral":true,"expiresAt":123}"#,
        )
        .unwrap();
        let info = reply.into_result().unwrap();
        assert_eq!(info.endpoint_id, "ep1");
        assert_eq!(info.expires_at, Some(123));
    }

    #[test]
    fn quota_unlimited_sentinel() {
        let quota: QuotaInfo =
            serde_json::from_str(r#"{"ownerId":null,"remaining":-1,"limit":-1}"#).unwrap();
        assert!(quota.is_unlimited());
        assert!(quota.period_end.is_none());
    }

    #[test]
    fn expiry_is_strict() {
        let info = EndpointInfo {
            endpoint_id: "ep".into(),
            owner_id: None,
            is_ephemeral: true,
            expires_at: Some(1_000),
            mock_response: None,
        };
        assert!(info.is_live_at(999));
        assert!(!info.is_live_at(1_000));
        assert!(!info.is_live_at(1_001));
    }

    #[test]
    fn error_kind_display_matches_wire_name() {
        assert_eq!(ErrorKind::BatchTooLarge.to_string(), "batch_too_large");
        assert_eq!(
            ErrorKind::ServerMisconfiguration.to_string(),
            "server_misconfiguration"
        );
    }
}
