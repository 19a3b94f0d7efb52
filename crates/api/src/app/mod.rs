//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: storage backend and application services
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: query shapes and JSON envelopes
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: AppServices) -> Router {
    let auth_state = middleware::AuthState {
        jwt: Arc::new(services.accounts.jwt().clone()),
    };

    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/api", routes::router())
        .layer(
            ServiceBuilder::new()
                .layer(Extension(Arc::new(services)))
                .layer(axum::middleware::from_fn_with_state(
                    auth_state,
                    middleware::session_middleware,
                )),
        )
}
