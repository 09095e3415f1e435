pub mod adapters;
pub use adapters::{TransportSpec, build_middleware};
pub mod args;
pub use args::{Cli, MqttFactoryKind, Transport};
