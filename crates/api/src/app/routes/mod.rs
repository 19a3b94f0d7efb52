use axum::Router;

pub mod auth;
pub mod devices;
pub mod inventory;
pub mod locations;
pub mod long_term;
pub mod products;
pub mod short_term;
pub mod system;
pub mod users;

/// Router for everything under `/api`.
///
/// Routes that change stock, products, the tree or the maintenance switch
/// take a `RequireSession`; the rest are public.
pub fn router() -> Router {
    Router::new()
        .nest("/sys", system::router())
        .nest("/auth", auth::router())
        .nest("/users", users::router())
        .nest("/devices", devices::router())
        .nest("/products", products::router())
        .nest("/locations", locations::router())
        .nest("/inventory", inventory::router())
        .nest("/rentals/short-term", short_term::router())
        .nest("/rentals/long-term", long_term::router())
}
