//! Process-wide logging setup.

pub mod subscriber;

pub use subscriber::LogFormat;

/// Initialize tracing with the format named by `LABINV_LOG_FORMAT`.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    let format = LogFormat::parse(std::env::var("LABINV_LOG_FORMAT").ok().as_deref());
    subscriber::init(format, "info");
}
