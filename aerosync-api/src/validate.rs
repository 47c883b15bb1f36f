//! Field extraction and type/range checking for inbound device payloads.
//!
//! Every extractor is a pure function over an already-parsed JSON object:
//! it either yields a typed value or a [`ValidationError`] naming the exact
//! failure. Absent fields, wrongly typed fields and out-of-range or unknown
//! enumeration indices are distinct kinds. Nothing in this module touches
//! device state.

use serde_json::{Map, Value};

use crate::models::{DeviceErrorCode, LightState, MqttClientState};

/// Wire field names shared by the sensor and actuator payloads.
pub mod fields {
    pub const MAC: &str = "MAC";
    pub const ERR_CODE: &str = "errCode";
    pub const MQTT_CLI_STATE: &str = "MQTTCliState";
    pub const ERR_DSCR: &str = "errDscr";
    pub const CO2: &str = "C02";
    pub const TEMP: &str = "temp";
    pub const FAN_REL_SPEED: &str = "fanRelSpeed";
    pub const LIGHT_STATE: &str = "lightState";
    pub const CLIENT_IP: &str = "clientIP";
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("required field `{0}` is missing")]
    FieldMissing(&'static str),

    #[error("field `{field}` is not {expected} (got `{got}`)")]
    FieldWrongType {
        field: &'static str,
        expected: &'static str,
        got: String,
    },

    #[error("unknown device error code {0}")]
    UnknownErrorCode(i64),

    #[error("unknown light state index {0}")]
    UnknownLightState(i64),

    #[error("fan relative speed {0} outside 0..=100")]
    FanSpeedOutOfRange(i64),
}

fn wrong_type(field: &'static str, expected: &'static str, value: &Value) -> ValidationError {
    ValidationError::FieldWrongType {
        field,
        expected,
        got: value.to_string(),
    }
}

fn integer(obj: &Map<String, Value>, field: &'static str) -> Result<i64, ValidationError> {
    let value = obj.get(field).ok_or(ValidationError::FieldMissing(field))?;
    value
        .as_i64()
        .ok_or_else(|| wrong_type(field, "an integer", value))
}

fn reading(obj: &Map<String, Value>, field: &'static str) -> Result<i32, ValidationError> {
    let value = integer(obj, field)?;
    i32::try_from(value).map_err(|_| ValidationError::FieldWrongType {
        field,
        expected: "a 32-bit integer",
        got: value.to_string(),
    })
}

fn string<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, ValidationError> {
    let value = obj.get(field).ok_or(ValidationError::FieldMissing(field))?;
    value
        .as_str()
        .ok_or_else(|| wrong_type(field, "a string", value))
}

/// Hardware address of the reporting device. Required, non-null string.
pub fn mac(obj: &Map<String, Value>) -> Result<String, ValidationError> {
    string(obj, fields::MAC).map(str::to_owned)
}

/// Device error code. Required; unknown indices are their own failure kind.
pub fn error_code(obj: &Map<String, Value>) -> Result<DeviceErrorCode, ValidationError> {
    let code = integer(obj, fields::ERR_CODE)?;
    DeviceErrorCode::try_from(code).map_err(ValidationError::UnknownErrorCode)
}

/// MQTT session state annotation. Optional; integer-checked when present.
pub fn client_state(obj: &Map<String, Value>) -> Result<MqttClientState, ValidationError> {
    match obj.get(fields::MQTT_CLI_STATE) {
        None => Ok(MqttClientState::Unknown),
        Some(_) => integer(obj, fields::MQTT_CLI_STATE).map(MqttClientState::from_code),
    }
}

/// Free-text error description. Optional; string-checked when present.
pub fn error_description(obj: &Map<String, Value>) -> Result<Option<String>, ValidationError> {
    match obj.get(fields::ERR_DSCR) {
        None => Ok(None),
        Some(_) => string(obj, fields::ERR_DSCR).map(|s| Some(s.to_owned())),
    }
}

/// CO2 density reading in ppm. Required integer, no range limit.
pub fn co2(obj: &Map<String, Value>) -> Result<i32, ValidationError> {
    reading(obj, fields::CO2)
}

/// Temperature reading in degrees Celsius. Required integer, no range limit.
pub fn temperature(obj: &Map<String, Value>) -> Result<i32, ValidationError> {
    reading(obj, fields::TEMP)
}

/// Relative fan speed. Required integer in 0..=100.
pub fn fan_rel_speed(obj: &Map<String, Value>) -> Result<u8, ValidationError> {
    let value = integer(obj, fields::FAN_REL_SPEED)?;
    if (0..=100).contains(&value) {
        Ok(value as u8)
    } else {
        Err(ValidationError::FanSpeedOutOfRange(value))
    }
}

/// Light state enumeration index. Required; unknown indices are rejected.
pub fn light_state(obj: &Map<String, Value>) -> Result<LightState, ValidationError> {
    let index = integer(obj, fields::LIGHT_STATE)?;
    LightState::try_from(index).map_err(ValidationError::UnknownLightState)
}

/// Reporting client address on actuator error notifications. Required string.
pub fn client_ip(obj: &Map<String, Value>) -> Result<String, ValidationError> {
    string(obj, fields::CLIENT_IP).map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn mac_requires_non_null_string() {
        assert_eq!(
            mac(&obj(json!({"C02": 500}))),
            Err(ValidationError::FieldMissing("MAC"))
        );
        assert_eq!(
            mac(&obj(json!({"MAC": null}))),
            Err(ValidationError::FieldWrongType {
                field: "MAC",
                expected: "a string",
                got: "null".into(),
            })
        );
        assert_eq!(mac(&obj(json!({"MAC": "AA:BB"}))), Ok("AA:BB".into()));
    }

    #[test]
    fn error_code_distinguishes_type_and_index_failures() {
        assert_eq!(
            error_code(&obj(json!({"errCode": "0"}))),
            Err(ValidationError::FieldWrongType {
                field: "errCode",
                expected: "an integer",
                got: "\"0\"".into(),
            })
        );
        assert_eq!(
            error_code(&obj(json!({"errCode": 77}))),
            Err(ValidationError::UnknownErrorCode(77))
        );
        assert_eq!(
            error_code(&obj(json!({"errCode": 0}))),
            Ok(DeviceErrorCode::Disconnected)
        );
    }

    #[test]
    fn optional_fields_default_when_absent() {
        let empty = obj(json!({}));
        assert_eq!(client_state(&empty), Ok(MqttClientState::Unknown));
        assert_eq!(error_description(&empty), Ok(None));
    }

    #[test]
    fn optional_fields_still_type_checked_when_present() {
        assert!(client_state(&obj(json!({"MQTTCliState": "up"}))).is_err());
        assert!(error_description(&obj(json!({"errDscr": 3}))).is_err());
        assert_eq!(
            client_state(&obj(json!({"MQTTCliState": 3}))),
            Ok(MqttClientState::Subscribed)
        );
        assert_eq!(
            error_description(&obj(json!({"errDscr": "queue full"}))),
            Ok(Some("queue full".into()))
        );
    }

    #[test]
    fn readings_require_integers() {
        assert_eq!(co2(&obj(json!({"C02": 2500}))), Ok(2500));
        assert!(co2(&obj(json!({"C02": 25.5}))).is_err());
        assert_eq!(temperature(&obj(json!({"temp": -4}))), Ok(-4));
        assert_eq!(
            temperature(&obj(json!({}))),
            Err(ValidationError::FieldMissing("temp"))
        );
    }

    #[test]
    fn fan_speed_range_is_enforced() {
        assert_eq!(fan_rel_speed(&obj(json!({"fanRelSpeed": 0}))), Ok(0));
        assert_eq!(fan_rel_speed(&obj(json!({"fanRelSpeed": 100}))), Ok(100));
        assert_eq!(
            fan_rel_speed(&obj(json!({"fanRelSpeed": 150}))),
            Err(ValidationError::FanSpeedOutOfRange(150))
        );
        assert_eq!(
            fan_rel_speed(&obj(json!({"fanRelSpeed": -1}))),
            Err(ValidationError::FanSpeedOutOfRange(-1))
        );
    }

    #[test]
    fn light_state_index_is_checked() {
        assert_eq!(
            light_state(&obj(json!({"lightState": 2}))),
            Ok(LightState::BlinkAlert)
        );
        assert_eq!(
            light_state(&obj(json!({"lightState": 9}))),
            Err(ValidationError::UnknownLightState(9))
        );
    }
}
