//! Self-service signup and password reset, both in three steps:
//! mail a code, trade the code for a ticket, finish with the ticket.

use std::sync::Arc;

use axum::{Json, Router, extract::Extension, response::Response, routing::post};
use serde_json::json;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/register/init", post(register_init))
        .route("/register/verify", post(register_verify))
        .route("/register/complete", post(register_complete))
        .route("/reset/init", post(reset_init))
        .route("/reset/verify", post(reset_verify))
        .route("/reset/complete", post(reset_complete))
}

pub async fn register_init(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::SignupInitRequest>,
) -> Response {
    match services.accounts.signup_init(&body.username, &body.email).await {
        Ok(expires_at) => dto::ok_json(json!({ "expiresAt": expires_at })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn register_verify(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::VerifyCodeRequest>,
) -> Response {
    match services.accounts.signup_verify(&body.email, &body.code).await {
        Ok(ticket) => dto::ok_json(serde_json::to_value(ticket).unwrap_or_default()),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn register_complete(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CompleteRequest>,
) -> Response {
    match services
        .accounts
        .signup_complete(&body.ticket, &body.password, &body.password_confirm)
        .await
    {
        Ok(user) => dto::ok_json(json!({ "user": user })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn reset_init(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::EmailRequest>,
) -> Response {
    match services.accounts.reset_init(&body.email).await {
        Ok(expires_at) => dto::ok_json(json!({ "expiresAt": expires_at })),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn reset_verify(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::VerifyCodeRequest>,
) -> Response {
    match services.accounts.reset_verify(&body.email, &body.code).await {
        Ok(ticket) => dto::ok_json(serde_json::to_value(ticket).unwrap_or_default()),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn reset_complete(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CompleteRequest>,
) -> Response {
    match services
        .accounts
        .reset_complete(&body.ticket, &body.password, &body.password_confirm)
        .await
    {
        Ok(()) => dto::ok_json(json!({})),
        Err(e) => errors::auth_error_to_response(e),
    }
}
