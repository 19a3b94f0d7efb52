//! HTTP API: routing, session handling and request/response mapping.

pub mod app;
pub mod context;
pub mod middleware;
