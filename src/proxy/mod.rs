// proxy module - 加密令牌反向代理核心

pub mod client_config;
pub mod crypto;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod providers;
pub mod rate_limit;
pub mod server;
pub mod stats;
pub mod token;
pub mod upstream;

pub use client_config::{ClientConfig, ClientRegistry};
pub use server::{AppState, AxumServer};
pub use token::{Token, UsageLedger};
