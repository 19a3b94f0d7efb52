//! Long-term loans to named borrowers.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    response::Response,
    routing::{get, post},
};
use serde_json::json;

use labinv_infra::services::{LongTermLoanRequest, LongTermReturnRequest};

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequireSession;

pub fn router() -> Router {
    Router::new()
        .route("/loan", post(loan))
        .route("/return", post(return_loans))
        .route("/open/pm", get(open_pm))
        .route("/open/nonpm", get(open_non_pm))
}

pub async fn loan(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(session): RequireSession,
    Json(body): Json<LongTermLoanRequest>,
) -> Response {
    match services.rentals.loan(body).await {
        Ok(report) => {
            tracing::info!(user = %session.username(), moved = report.succeeded, "long-term loan batch");
            dto::batch_json("moved", &report)
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn return_loans(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(_): RequireSession,
    Json(body): Json<LongTermReturnRequest>,
) -> Response {
    match services.rentals.return_long_term(body).await {
        Ok(result) => dto::ok_json(json!({ "result": result })),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn open_pm(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> Response {
    match services.rentals.open_pm(query.q(), query.page()).await {
        Ok(page) => dto::page_json(page),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn open_non_pm(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> Response {
    match services.rentals.open_non_pm(query.q(), query.page()).await {
        Ok(page) => dto::page_json(page),
        Err(e) => errors::service_error_to_response(e),
    }
}
