use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::Utc;
use serde_json::json;

use labinv_core::{Page, ProductId};
use labinv_products::{Product, ProductDraft};

use crate::app::{dto, errors, services::AppServices};
use crate::context::RequireSession;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/usage", get(product_usage))
        .route("/:id", get(get_product).put(update_product).delete(delete_product))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::ListQuery>,
) -> Response {
    let products = match services.store.list_products().await {
        Ok(p) => p,
        Err(e) => return errors::store_error_to_response(e),
    };
    let matching = query.product_query().apply(products);
    let req = query.page().clamp_to(matching.len());
    dto::page_json(Page::from_vec(matching, req))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(session): RequireSession,
    Json(draft): Json<ProductDraft>,
) -> Response {
    let product = match Product::create(ProductId::new(), draft, Utc::now()) {
        Ok(p) => p,
        Err(e) => return errors::domain_error_to_response(e),
    };
    match services.store.insert_product(product).await {
        Ok(product) => {
            tracing::info!(product = %product.id, user = %session.username(), "product created");
            (
                StatusCode::CREATED,
                Json(json!({ "ok": true, "id": product.id })),
            )
                .into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Response {
    let id: ProductId = match dto::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.store.get_product(id).await {
        Ok(Some(product)) => dto::ok_json(json!({ "data": product })),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "Product not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn update_product(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(_): RequireSession,
    Path(id): Path<String>,
    Json(draft): Json<ProductDraft>,
) -> Response {
    let id: ProductId = match dto::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.store.update_product(id, draft).await {
        Ok(product) => dto::ok_json(json!({ "data": product })),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn delete_product(
    Extension(services): Extension<Arc<AppServices>>,
    RequireSession(session): RequireSession,
    Path(id): Path<String>,
) -> Response {
    let id: ProductId = match dto::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.store.delete_product(id).await {
        Ok(()) => {
            tracing::info!(product = %id, user = %session.username(), "product deleted");
            dto::ok_json(json!({}))
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn product_usage(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::IdsQuery>,
) -> Response {
    let ids: Vec<ProductId> = query.parse();
    match services.store.product_usage(&ids).await {
        Ok(items) => dto::ok_json(json!({ "items": items })),
        Err(e) => errors::store_error_to_response(e),
    }
}
