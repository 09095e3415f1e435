pub mod interfaces;
pub use interfaces::*;
pub mod values;
pub use values::*;

pub const MQTT_HOSTNAME: &str = "localhost";
pub const MQTT_PORT: u16 = 1883;
