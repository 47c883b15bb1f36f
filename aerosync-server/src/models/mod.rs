mod device;

pub use device::{
    Actuator, ActuatorState, DeviceDirectory, ObserveHandle, ResourceSlot, Sensor, SensorState,
};
