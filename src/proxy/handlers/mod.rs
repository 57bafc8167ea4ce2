// Handlers - 统一入口 (relay) 与健康检查

pub mod health;
pub mod relay;

pub use health::handle_health;
pub use relay::handle_relay;
