pub mod modules;
pub mod proxy;

/// Server version reported by `/health` and the startup banner.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
