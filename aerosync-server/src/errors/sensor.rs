use aerosync_api::{Id, ValidationError};

use crate::errors::{Reportable, Severity};

/// Everything that can go wrong on the sensor telemetry path.
///
/// Per-message kinds are caught at the message boundary and reported; only
/// the session-level kinds at the bottom terminate the service.
#[derive(Debug, thiserror::Error)]
pub enum SensorNetError {
    #[error("telemetry payload is not a JSON object: {raw}")]
    NotJson { raw: String },

    /// Validation failure before the sender could be identified.
    #[error(transparent)]
    Malformed(#[from] ValidationError),

    /// Validation failure on a message from a known sensor.
    #[error("invalid field in message from sensor {device}: {source}")]
    Field {
        device: Id,
        #[source]
        source: ValidationError,
    },

    #[error("no sensor registered for address `{mac}`")]
    UnknownAddress { mac: String },

    #[error("message from sensor {device} on unhandled topic `{topic}`")]
    UnknownTopic { device: Id, topic: String },

    /// A retained last-will from a previous run, masked by the bootstrap
    /// window.
    #[error("stale disconnect for sensor {device} ignored during bootstrap")]
    StaleDisconnect { device: Id },

    #[error("average fan speed {value} outside 0..=100, not published")]
    AvgFanSpeedOutOfRange { value: u8 },

    #[error("TLS material unavailable: {0}")]
    Tls(String),

    #[error("MQTT session setup failed: {0}")]
    Connect(#[source] rumqttc::ClientError),

    #[error("MQTT publish failed: {0}")]
    Publish(#[source] rumqttc::ClientError),

    #[error("broker connection lost after {attempts} reconnect attempts: {reason}")]
    BrokerLost { attempts: u32, reason: String },
}

impl SensorNetError {
    /// Device the failure is attributable to, when identification succeeded.
    pub fn device(&self) -> Option<Id> {
        match self {
            Self::Field { device, .. }
            | Self::UnknownTopic { device, .. }
            | Self::StaleDisconnect { device } => Some(*device),
            _ => None,
        }
    }
}

impl Reportable for SensorNetError {
    fn severity(&self) -> Severity {
        match self {
            Self::StaleDisconnect { .. } => Severity::Warning,
            Self::Tls(_) | Self::Connect(_) | Self::BrokerLost { .. } => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}
