use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, StatusCode, request::Parts},
    response::Response,
};

use labinv_auth::SessionClaims;
use labinv_core::UserId;

use crate::app::errors::json_error;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "session";
/// Cookie carrying the device identity of a kiosk browser.
pub const DEVICE_COOKIE: &str = "deviceId";
/// Header alternative to [`DEVICE_COOKIE`].
pub const DEVICE_HEADER: &str = "x-device-id";

/// Signed-in user of a request, inserted by the session middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    user_id: UserId,
    username: String,
}

impl SessionContext {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl From<SessionClaims> for SessionContext {
    fn from(claims: SessionClaims) -> Self {
        Self::new(claims.user_id, claims.username)
    }
}

/// Extractor for routes that need a signed-in user; answers 401 otherwise.
#[derive(Debug, Clone)]
pub struct RequireSession(pub SessionContext);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequireSession {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .map(RequireSession)
            .ok_or_else(|| json_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Unauthorized"))
    }
}

/// The session, when there is one.
#[derive(Debug, Clone)]
pub struct MaybeSession(pub Option<SessionContext>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MaybeSession {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<SessionContext>().cloned()))
    }
}

/// Device identity from the `deviceId` cookie, else the `x-device-id` header.
#[derive(Debug, Clone, Default)]
pub struct DeviceIdentity(pub Option<String>);

impl DeviceIdentity {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for DeviceIdentity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_cookie = cookie(&parts.headers, DEVICE_COOKIE);
        let from_header = parts
            .headers
            .get(DEVICE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim);
        Ok(Self(
            from_cookie
                .or(from_header)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        ))
    }
}

/// Value of cookie `name` from the `Cookie` header(s).
pub fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim())
}

/// Whether the client reached us over https (directly or via a proxy).
pub fn is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_lookup_across_pairs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("theme=dark; deviceId=abc-123 ; session=tok"),
        );
        assert_eq!(cookie(&headers, "deviceId"), Some("abc-123"));
        assert_eq!(cookie(&headers, "session"), Some("tok"));
        assert_eq!(cookie(&headers, "missing"), None);
    }

    #[test]
    fn forwarded_proto_decides_secure() {
        let mut headers = HeaderMap::new();
        assert!(!is_secure(&headers));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        assert!(is_secure(&headers));
    }
}
