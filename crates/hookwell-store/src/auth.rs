//! Shared-secret authentication for the store surface.
//!
//! Every capture/lookup route requires `Authorization: Bearer <secret>`.
//! The comparison is constant-time, and the store fails closed: with no
//! secret configured, authenticated routes answer 500 rather than letting
//! unauthenticated writes through.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use subtle::ConstantTimeEq;

use hookwell_proto::{ErrorBody, ErrorKind};

use crate::AppState;

/// Pull the token out of a `Bearer <token>` header, scheme matched
/// case-insensitively.
fn extract_bearer(auth_header: &str) -> Option<&str> {
    let (scheme, token) = auth_header.split_at_checked(7)?;
    if !scheme.eq_ignore_ascii_case("bearer ") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}

/// Middleware guarding all capture and lookup routes.
pub async fn require_shared_secret(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorBody>)> {
    let Some(secret) = state.config.capture_shared_secret.as_deref() else {
        return Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::new(ErrorKind::ServerMisconfiguration)),
        ));
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer);

    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(secret.as_bytes())) => {
            Ok(next.run(request).await)
        }
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new(ErrorKind::Unauthorized)),
        )),
    }
}
