//! Validation for the capture paths.
//!
//! The single-capture path validates every field; the batch path trusts the
//! receiver and only bounds slug and batch size. Failures map onto the wire
//! error taxonomy, never onto free-form messages.

use std::collections::BTreeMap;

use hookwell_proto::{
    is_valid_slug, ErrorKind, ALLOWED_METHODS, MAX_BATCH_SIZE, MAX_HEADER_COUNT, MAX_IP_LEN,
    MAX_PATH_LEN, MAX_QUERY_PARAM_COUNT, MAX_STORE_BODY_SIZE,
};

use crate::models::CaptureRequest;

/// Validate a single capture submission.
pub fn validate_capture(req: &CaptureRequest) -> Result<(), ErrorKind> {
    if !ALLOWED_METHODS.contains(&req.method.as_str()) {
        return Err(ErrorKind::InvalidMethod);
    }
    if !is_valid_slug(&req.slug) {
        return Err(ErrorKind::InvalidSlug);
    }
    if req.path.is_empty() || !req.path.starts_with('/') || req.path.len() > MAX_PATH_LEN {
        return Err(ErrorKind::InvalidPath);
    }
    if req.ip.len() > MAX_IP_LEN {
        return Err(ErrorKind::InvalidIp);
    }
    if req.headers.len() > MAX_HEADER_COUNT {
        return Err(ErrorKind::InvalidHeaders);
    }
    if req.query_params.len() > MAX_QUERY_PARAM_COUNT {
        return Err(ErrorKind::InvalidQueryParams);
    }
    if req.body.as_ref().is_some_and(|b| b.len() > MAX_STORE_BODY_SIZE) {
        return Err(ErrorKind::BodyTooLarge);
    }
    Ok(())
}

/// Bound a batch submission: valid slug, at most `MAX_BATCH_SIZE` entries.
pub fn validate_batch(slug: &str, len: usize) -> Result<(), ErrorKind> {
    if !is_valid_slug(slug) {
        return Err(ErrorKind::InvalidSlug);
    }
    if len > MAX_BATCH_SIZE {
        return Err(ErrorKind::BatchTooLarge);
    }
    Ok(())
}

/// Extract the Content-Type header case-insensitively.
pub fn content_type_of(headers: &BTreeMap<String, String>) -> Option<String> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.clone())
}
