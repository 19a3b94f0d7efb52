//! Login, logout and the current session.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;

use labinv_auth::SESSION_TTL_SECS;

use crate::app::{dto, errors, services::AppServices};
use crate::context::{RequireSession, SESSION_COOKIE, is_secure};

pub fn router() -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout).get(logout))
        .route("/me", get(me))
}

pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::LoginRequest>,
) -> Response {
    let session = match services.accounts.login(body.login(), &body.password).await {
        Ok(s) => s,
        Err(e) => return errors::auth_error_to_response(e),
    };
    let cookie = session_cookie(&session.token, SESSION_TTL_SECS, is_secure(&headers));
    with_cookie(dto::ok_json(json!({ "user": session.user })), &cookie)
}

pub async fn logout(headers: HeaderMap) -> Response {
    let cookie = session_cookie("", 0, is_secure(&headers));
    with_cookie(dto::ok_json(json!({})), &cookie)
}

pub async fn me(RequireSession(session): RequireSession) -> Response {
    dto::ok_json(json!({
        "user": { "id": session.user_id(), "username": session.username() },
    }))
}

fn session_cookie(value: &str, max_age: i64, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={value}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

fn with_cookie(response: Response, cookie: &str) -> Response {
    match HeaderValue::from_str(cookie) {
        Ok(value) => ([(header::SET_COOKIE, value)], response).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "session cookie is not a valid header value");
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_attributes() {
        let plain = session_cookie("tok", 60, false);
        assert_eq!(plain, "session=tok; HttpOnly; SameSite=Lax; Path=/; Max-Age=60");
        assert!(session_cookie("tok", 60, true).ends_with("; Secure"));
    }
}
