pub mod models;
pub mod validate;

pub use models::{ActuatorResource, DeviceErrorCode, LightState, MqttClientState};
pub use validate::ValidationError;

/// Device identifier assigned by the device directory.
pub type Id = i32;
