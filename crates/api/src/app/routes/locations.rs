use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::Extension,
    response::Response,
    routing::get,
};
use serde_json::json;

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequireSession;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_locations))
        .route("/tree", get(get_tree).put(save_tree))
        .route("/leaves", get(leaves))
        .route("/usage", get(usage))
}

pub async fn list_locations(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.store.list_locations().await {
        Ok(items) => dto::ok_json(json!({ "items": items })),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_tree(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.inventory.tree().await {
        Ok(tree) => dto::ok_json(json!({ "tree": tree.nested(services.root) })),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn save_tree(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(session): RequireSession,
    Json(body): Json<dto::TreeSaveRequest>,
) -> Response {
    match services.store.save_tree(&body.nodes, services.root).await {
        Ok(plan) => {
            tracing::info!(
                user = %session.username(),
                created = plan.creates.len(),
                updated = plan.updates.len(),
                deleted = plan.deletes.len(),
                "location tree saved"
            );
            dto::ok_json(json!({
                "created": plan.creates.len(),
                "updated": plan.updates.len(),
                "deleted": plan.deletes.len(),
            }))
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn leaves(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.inventory.tree().await {
        Ok(tree) => dto::ok_json(json!({ "items": tree.leaves() })),
        Err(e) => errors::service_error_to_response(e),
    }
}

pub async fn usage(Extension(services): Extension<Arc<AppServices>>) -> Response {
    match services.store.active_stock_counts().await {
        Ok(counts) => {
            let counts: BTreeMap<String, u64> = counts.into_iter().map(|(id, n)| (id.to_string(), n)).collect();
            dto::ok_json(json!({ "counts": counts }))
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
