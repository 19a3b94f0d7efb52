//! Kiosk device registry used by short-term loans.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    response::Response,
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use labinv_core::DeviceId;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", get(device_exists).post(register_device))
        .route("/verify", get(verify_device))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceQuery {
    id: Option<String>,
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

impl DeviceQuery {
    /// Absent or blank is `None`; anything else must be a valid id.
    fn id(&self) -> Result<Option<DeviceId>, Response> {
        match self.id.as_deref().or(self.device_id.as_deref()).map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => dto::parse_id(raw).map(Some),
        }
    }
}

pub async fn device_exists(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let id = match query.id() {
        Ok(Some(id)) => id,
        Ok(None) => return dto::ok_json(json!({ "exists": false })),
        Err(resp) => return resp,
    };
    match services.store.get_device(id).await {
        Ok(device) => dto::ok_json(json!({ "exists": device.is_some() })),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn register_device(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::RegisterDeviceRequest>,
) -> Response {
    let id: DeviceId = match dto::parse_id(&body.id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.store.upsert_device(id, &body.name, Utc::now()).await {
        Ok(device) => {
            tracing::info!(device = %device.id, name = %device.name, "device registered");
            dto::ok_json(json!({ "device": device }))
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn verify_device(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    let id = match query.id() {
        Ok(Some(id)) => id,
        Ok(None) => return dto::ok_json(json!({ "exists": false })),
        Err(resp) => return resp,
    };
    match services.store.get_device(id).await {
        Ok(Some(device)) => dto::ok_json(json!({ "exists": true, "device": device })),
        Ok(None) => dto::ok_json(json!({ "exists": false })),
        Err(e) => errors::store_error_to_response(e),
    }
}
