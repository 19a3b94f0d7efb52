//! Short-term loans to registered kiosk devices.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use serde_json::json;

use labinv_infra::services::{BorrowRequest, ExtendRequest, Returner, ShortTermReturnRequest};

use crate::app::{dto, errors, services::AppServices};
use crate::context::{DeviceIdentity, MaybeSession};

pub fn router() -> Router {
    Router::new()
        .route("/available", get(available))
        .route("/active", get(active))
        .route("/borrow", post(borrow))
        .route("/extend", post(extend))
        .route("/return", post(return_loan))
}

pub async fn available(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.inventory.available().await {
        Ok(items) => dto::ok_json(json!({ "items": items })),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// `?mine=1` narrows to the calling device; `?includeDeviceNames=1` adds names.
pub async fn active(
    Extension(services): Extension<Arc<AppServices>>,
    device: DeviceIdentity,
    Query(flags): Query<dto::FlagQuery>,
) -> Response {
    let only = if dto::flag(&flags.mine) { device.as_deref() } else { None };
    if dto::flag(&flags.mine) && only.is_none() {
        return dto::ok_json(json!({ "items": [] }));
    }
    match services
        .rentals
        .active(only, dto::flag(&flags.include_device_names))
        .await
    {
        Ok(items) => dto::ok_json(json!({ "items": items })),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn borrow(
    Extension(services): Extension<Arc<AppServices>>,
    device: DeviceIdentity,
    Json(body): Json<BorrowRequest>,
) -> Response {
    match services.rentals.borrow(body, device.as_deref()).await {
        Ok(rental) => dto::ok_json(json!({ "id": rental.id, "dueDate": rental.due_date })),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn extend(
    Extension(services): Extension<Arc<AppServices>>,
    device: DeviceIdentity,
    Json(body): Json<ExtendRequest>,
) -> Response {
    match services.rentals.extend(body, device.as_deref()).await {
        Ok(rental) => dto::ok_json(json!({ "id": rental.id, "dueDate": rental.due_date })),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// The borrowing device returns its own loan; `?admin=1` lets a signed-in
/// user return any of them.
pub async fn return_loan(
    Extension(services): Extension<Arc<AppServices>>,
    MaybeSession(session): MaybeSession,
    device: DeviceIdentity,
    Query(flags): Query<dto::FlagQuery>,
    Json(body): Json<ShortTermReturnRequest>,
) -> Response {
    let returner = if dto::flag(&flags.admin) {
        if session.is_none() {
            return errors::json_error(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Unauthorized");
        }
        Returner::Admin
    } else {
        match device.0 {
            Some(id) => Returner::Device(id),
            None => {
                return errors::json_error(StatusCode::FORBIDDEN, "FORBIDDEN", "Missing device id");
            }
        }
    };
    match services.rentals.return_short_term(body, returner).await {
        Ok(rental) => dto::ok_json(json!({ "id": rental.id, "returnDate": rental.return_date })),
        Err(e) => errors::service_error_to_response(e),
    }
}
