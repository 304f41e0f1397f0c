pub mod config;
pub mod domain;
pub mod interface;
pub mod metrics;
pub mod service;

pub use config::GatewayConfig;
pub use service::ApplicationBootstrap;
