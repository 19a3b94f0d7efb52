use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use labinv_auth::JwtValidator;

use crate::context::{SESSION_COOKIE, SessionContext, cookie};

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Attach a [`SessionContext`] when the request carries a valid session.
///
/// Missing or invalid tokens pass through unauthenticated; routes that need
/// a user reject them via `RequireSession`.
pub async fn session_middleware(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(token) = extract_token(req.headers()) {
        match state.jwt.validate(token, Utc::now()) {
            Ok(claims) => {
                req.extensions_mut().insert(SessionContext::from(claims));
            }
            Err(e) => tracing::debug!(error = %e, "session token rejected"),
        }
    }
    next.run(req).await
}

/// Bearer token first, then the session cookie.
fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    bearer.or_else(|| cookie(headers, SESSION_COOKIE).filter(|t| !t.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::COOKIE, HeaderValue::from_static("session=from-cookie"));
        assert_eq!(extract_token(&headers), Some("from-cookie"));
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_token(&headers), Some("from-header"));
    }
}
