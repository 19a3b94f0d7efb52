use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

use labinv_core::DomainError;
use labinv_infra::services::{AuthError, ServiceError};
use labinv_infra::store::StoreError;

/// `{ok: false, error, message}` with `status`.
pub fn json_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    json_error_with(status, code, message, Value::Null)
}

/// Like [`json_error`], with the keys of `extra` merged into the body.
pub fn json_error_with(status: StatusCode, code: &str, message: impl Into<String>, extra: Value) -> Response {
    let mut body = json!({
        "ok": false,
        "error": code,
        "message": message.into(),
    });
    if let (Some(target), Value::Object(extra)) = (body.as_object_mut(), extra) {
        target.extend(extra);
    }
    (status, axum::Json(body)).into_response()
}

pub fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::BadRequest { code, message, details } => {
            json_error_with(StatusCode::BAD_REQUEST, code, message, details.unwrap_or(Value::Null))
        }
        ServiceError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "FORBIDDEN", msg),
        ServiceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "CONFLICT", msg),
        ServiceError::Lifecycle(e) => json_error(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
        ServiceError::Tree(e) => json_error(StatusCode::BAD_REQUEST, e.code(), e.to_string()),
        ServiceError::Unexpected(e) => {
            tracing::error!(error = ?e, "request failed");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal server error")
        }
    }
}

pub fn store_error_to_response(err: StoreError) -> Response {
    service_error_to_response(err.into())
}

pub fn domain_error_to_response(err: DomainError) -> Response {
    service_error_to_response(err.into())
}

pub fn auth_error_to_response(err: AuthError) -> Response {
    let status = match &err {
        AuthError::Validation(_)
        | AuthError::CodeExpired
        | AuthError::CodeMismatch
        | AuthError::InvalidTicket(_) => StatusCode::BAD_REQUEST,
        AuthError::InvalidCredentials | AuthError::Unauthenticated => StatusCode::UNAUTHORIZED,
        AuthError::UsernameTaken | AuthError::EmailTaken => StatusCode::CONFLICT,
        AuthError::AccountMissing => StatusCode::NOT_FOUND,
        AuthError::Store(StoreError::Conflict(_)) => StatusCode::CONFLICT,
        AuthError::Store(_) | AuthError::Internal(_) => {
            tracing::error!(error = ?err, "account flow failed");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Internal server error");
        }
    };
    json_error(status, err.code(), err.to_string())
}

/// Body for invalid JSON or wrong shapes.
pub fn invalid_body(err: impl std::fmt::Display) -> Response {
    json_error(StatusCode::BAD_REQUEST, "INVALID_BODY", format!("Invalid JSON body: {err}"))
}
