use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    http::StatusCode,
    routing::get,
};

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequireSession;

pub fn router() -> Router {
    Router::new().route("/maintenance", get(get_maintenance).post(set_maintenance))
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn get_maintenance(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let state = services.maintenance.get().await;
    dto::ok_json(serde_json::to_value(state).unwrap_or_default())
}

pub async fn set_maintenance(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(session): RequireSession,
    Json(body): Json<dto::MaintenanceUpdate>,
) -> axum::response::Response {
    match services.maintenance.set(body.on, body.message).await {
        Ok(state) => {
            tracing::info!(user = %session.username(), on = state.on, version = state.version, "maintenance updated");
            dto::ok_json(serde_json::to_value(state).unwrap_or_default())
        }
        Err(e) => {
            tracing::error!(error = ?e, "maintenance write failed");
            errors::json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "Failed to save maintenance state")
        }
    }
}
