//! Infrastructure layer: storage backends, configuration, mail, runtime
//! state and the application services built on top of them.

pub mod config;
pub mod mailer;
pub mod maintenance;
pub mod services;
pub mod store;
