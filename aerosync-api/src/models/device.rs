use std::fmt;

use serde::{Deserialize, Serialize};

/// Observed state of an actuator's light resource.
///
/// The wire representation is the enumeration index; indices outside the
/// known set are rejected during validation rather than stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightState {
    /// Light off
    Off,
    /// Light on, steady
    On,
    /// Slow blink, maintenance warning
    BlinkAlert,
    /// Fast blink, evacuation signal
    BlinkEmergency,
}

impl LightState {
    /// Wire index of this state.
    pub fn index(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for LightState {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Off),
            1 => Ok(Self::On),
            2 => Ok(Self::BlinkAlert),
            3 => Ok(Self::BlinkEmergency),
            other => Err(other),
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::On => "on",
            Self::BlinkAlert => "blink-alert",
            Self::BlinkEmergency => "blink-emergency",
        };
        write!(f, "{name}")
    }
}

/// Error conditions a device can report on its error stream.
///
/// The set is closed: an unknown wire index is a validation failure, not a
/// new code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceErrorCode {
    /// The device lost connectivity (sensors deliver this as a broker
    /// last-will publication)
    Disconnected,
    /// A transducer read failed on the device
    SensorReadFailure,
    /// The device's outbound publish queue is saturated
    PublishQueueFull,
    /// An actuator rejected a commanded value
    InvalidSetpoint,
    /// Supply voltage below the operating threshold
    LowVoltage,
}

impl DeviceErrorCode {
    /// Fixed human-readable description used in reports.
    pub fn description(self) -> &'static str {
        match self {
            Self::Disconnected => "device disconnected",
            Self::SensorReadFailure => "transducer read failure",
            Self::PublishQueueFull => "publish queue saturated",
            Self::InvalidSetpoint => "commanded value rejected",
            Self::LowVoltage => "supply voltage low",
        }
    }
}

impl TryFrom<i64> for DeviceErrorCode {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Disconnected),
            1 => Ok(Self::SensorReadFailure),
            2 => Ok(Self::PublishQueueFull),
            3 => Ok(Self::InvalidSetpoint),
            4 => Ok(Self::LowVoltage),
            other => Err(other),
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// MQTT session state a sensor may attach to an error report.
///
/// Unknown indices are tolerated and collapse to [`MqttClientState::Unknown`],
/// which is also the default when the field is absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MqttClientState {
    /// State not reported or not recognized
    #[default]
    Unknown,
    /// Client created, not yet connecting
    Init,
    /// Connection to the broker in progress
    Connecting,
    /// Connected, not yet subscribed
    Connected,
    /// Connected and subscribed
    Subscribed,
    /// Graceful disconnect in progress
    Disconnecting,
}

impl MqttClientState {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Subscribed,
            4 => Self::Disconnecting,
            _ => Self::Unknown,
        }
    }
}

/// The three observable resources an actuator exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorResource {
    /// Relative fan speed, 0..=100
    Fan,
    /// Light state enumeration
    Light,
    /// Device error stream
    Errors,
}

impl ActuatorResource {
    pub const ALL: [Self; 3] = [Self::Fan, Self::Light, Self::Errors];

    /// Resource path on the device.
    pub fn path(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Light => "light",
            Self::Errors => "errors",
        }
    }
}

impl fmt::Display for ActuatorResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_state_round_trip() {
        for index in 0..4 {
            let state = LightState::try_from(index).unwrap();
            assert_eq!(state.index(), index);
        }
        assert_eq!(LightState::try_from(4), Err(4));
        assert_eq!(LightState::try_from(-1), Err(-1));
    }

    #[test]
    fn error_code_rejects_unknown_index() {
        assert_eq!(DeviceErrorCode::try_from(0), Ok(DeviceErrorCode::Disconnected));
        assert_eq!(DeviceErrorCode::try_from(99), Err(99));
    }

    #[test]
    fn client_state_tolerates_unknown_index() {
        assert_eq!(MqttClientState::from_code(2), MqttClientState::Connected);
        assert_eq!(MqttClientState::from_code(42), MqttClientState::Unknown);
    }
}
