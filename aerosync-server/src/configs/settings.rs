use std::{env, fs, io};

use serde::{Deserialize, Serialize};

use crate::configs::normalize_path;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_VAR: &str = "AEROSYNC_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("cannot read config file `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GatewayAuth {
    BasicAuth { username: String, password: String },
    TlsAuth { cert_path: String, key_path: String },
}

/// MQTT broker endpoint the sensors publish through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic prefix under which the per-quantity subtopics live.
    pub base_topic: String,
    pub auth: Option<GatewayAuth>,
    /// Cadence of the average fan speed publication, seconds.
    #[serde(default = "default_avg_fan_period")]
    pub avg_fan_period_secs: u64,
}

fn default_avg_fan_period() -> u64 {
    60
}

/// Timing knobs of the two liveness mechanisms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liveness {
    /// Delay after startup before unreported sensors are declared offline.
    pub bootstrap_grace_secs: u64,
    /// Fixed rate of the per-actuator probe task.
    pub watchdog_period_secs: u64,
    /// Upper bound on a single liveness probe round-trip.
    pub ping_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorEntry {
    pub id: i32,
    pub mac: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorEntry {
    pub id: i32,
    pub mac: String,
    /// Explicit endpoint override; derived from the MAC when absent.
    pub addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub gateway: Gateway,
    pub liveness: Liveness,
    pub sensors: Vec<SensorEntry>,
    pub actuators: Vec<ActuatorEntry>,
}

impl Settings {
    pub fn new() -> Result<Self, SettingsError> {
        let path = env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let mut settings: Settings = toml::from_str(&raw)?;

        if let Some(GatewayAuth::TlsAuth { cert_path, key_path }) = &mut settings.gateway.auth {
            *cert_path = normalize_path(cert_path)
                .map_err(|e| SettingsError::Invalid(e.to_string()))?
                .to_string_lossy()
                .to_string();
            *key_path = normalize_path(key_path)
                .map_err(|e| SettingsError::Invalid(e.to_string()))?
                .to_string_lossy()
                .to_string();
        }

        settings.validate()?;

        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.liveness.watchdog_period_secs <= self.liveness.ping_timeout_secs {
            return Err(SettingsError::Invalid(format!(
                "watchdog period ({}s) must exceed the ping timeout ({}s)",
                self.liveness.watchdog_period_secs, self.liveness.ping_timeout_secs
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Settings {
        toml::from_str(raw).unwrap()
    }

    const MINIMAL: &str = r#"
        [logger]
        level = "info"

        [gateway]
        host = "localhost"
        port = 1883
        client_id = "aerosync"
        base_topic = "aerosync"

        [liveness]
        bootstrap_grace_secs = 50
        watchdog_period_secs = 15
        ping_timeout_secs = 2

        [[sensors]]
        id = 1
        mac = "AA:BB:CC:DD:EE:01"

        [[actuators]]
        id = 2
        mac = "AA:BB:CC:DD:EE:02"
    "#;

    #[test]
    fn minimal_config_parses_and_validates() {
        let settings = parse(MINIMAL);
        assert!(settings.validate().is_ok());
        assert_eq!(settings.gateway.avg_fan_period_secs, 60);
        assert!(settings.actuators[0].addr.is_none());
    }

    #[test]
    fn watchdog_period_must_exceed_ping_timeout() {
        let mut settings = parse(MINIMAL);
        settings.liveness.watchdog_period_secs = 2;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid(_))
        ));
    }
}
