mod device;

pub use device::{ActuatorResource, DeviceErrorCode, LightState, MqttClientState};
