pub mod bootstrap;
pub mod wire;

pub use bootstrap::{ApplicationBootstrap, GatewayHandle, start_gateway};
pub use wire::ApplicationContext;
