//! Stock intake, moves, discards and the stock listings.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    response::Response,
    routing::{get, patch, post},
};
use serde_json::json;

use labinv_core::StockId;
use labinv_infra::services::{AddStockRequest, DiscardBatchRequest, TransferRequest};

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequireSession;

pub fn router() -> Router {
    Router::new()
        .route("/add", post(add_stock))
        .route("/transfer", post(transfer))
        .route("/discard", post(discard))
        .route("/pm", get(list_pm))
        .route("/nonpm", get(list_non_pm))
        .route("/pm/iams", patch(set_iams_id))
        .route("/stock/:id/history", get(stock_history))
}

pub async fn add_stock(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(session): RequireSession,
    Json(body): Json<AddStockRequest>,
) -> Response {
    match services.inventory.add_stock(body).await {
        Ok(report) => {
            tracing::info!(user = %session.username(), total = report.total(), "stock added");
            dto::ok_json(json!({ "created": report, "total": report.total() }))
        }
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(_): RequireSession,
    Json(body): Json<TransferRequest>,
) -> Response {
    match services.inventory.transfer(body).await {
        Ok(report) => dto::batch_json("moved", &report),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn discard(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(_): RequireSession,
    Json(body): Json<DiscardBatchRequest>,
) -> Response {
    match services.inventory.discard(body).await {
        Ok(report) => dto::batch_json("discarded", &report),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_pm(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> Response {
    match services.inventory.pm_stock(&query.stock_search(), query.page()).await {
        Ok(page) => dto::page_json(page),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn list_non_pm(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> Response {
    match services.inventory.non_pm_stock(&query.stock_search(), query.page()).await {
        Ok(page) => dto::page_json(page),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn set_iams_id(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(_): RequireSession,
    Json(body): Json<dto::IamsUpdate>,
) -> Response {
    let id: StockId = match dto::parse_id(&body.stock_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.inventory.set_iams_id(id, body.iams_id.as_deref()).await {
        Ok(stock) => dto::ok_json(json!({
            "stockId": stock.id,
            "iamsId": stock.iams_id,
            "cleared": stock.iams_id.is_none(),
        })),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn stock_history(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: StockId = match dto::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.inventory.history(id).await {
        Ok(history) => dto::ok_json(json!({ "history": history })),
        Err(e) => errors::service_error_to_response(e),
    }
}
