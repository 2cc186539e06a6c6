//! Capability + CSRF enforcement for the management API (§6). Both tokens
//! are generated once at daemon startup and logged to the operator's
//! terminal; the token exchange/rotation flow itself is a UI concern this
//! daemon doesn't implement (§6 explicitly defers its shape).

use super::{ApiError, AppState};
use crate::atoms::error::SignetError;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

const CAPABILITY_HEADER: &str = "authorization";
const CSRF_HEADER: &str = "x-csrf-token";
const BEARER_PREFIX: &str = "Bearer ";

/// Requires a valid capability token on every request, and a matching CSRF
/// token on every request that isn't a plain GET.
pub async fn require_capability_and_csrf(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let capability = req
        .headers()
        .get(CAPABILITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(BEARER_PREFIX));
    if capability != Some(state.session_token.as_str()) {
        return Err(ApiError(SignetError::SessionExpired));
    }
    if req.method() != Method::GET {
        let csrf = req.headers().get(CSRF_HEADER).and_then(|v| v.to_str().ok());
        if csrf != Some(state.csrf_token.as_str()) {
            return Err(ApiError(SignetError::CsrfInvalid));
        }
    }
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_prefix_strips_cleanly() {
        let header = format!("{BEARER_PREFIX}sometoken");
        assert_eq!(header.strip_prefix(BEARER_PREFIX), Some("sometoken"));
    }
}
