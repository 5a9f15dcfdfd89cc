use super::SensorReading;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Longest accepted sensor identifier, in bytes
pub const MAX_SENSOR_ID_LEN: usize = 128;

/// Validation errors for inbound sensor messages
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    Malformed(String),
    NotAnObject,
    MissingSensorId,
    MissingDistance,
    InvalidSensorId(String),
    InvalidDistance,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Malformed(e) => write!(f, "message is not valid JSON: {}", e),
            ValidationError::NotAnObject => write!(f, "message must be a JSON object"),
            ValidationError::MissingSensorId => write!(f, "sensor_id is required"),
            ValidationError::MissingDistance => write!(f, "distance is required"),
            ValidationError::InvalidSensorId(id) => {
                write!(
                    f,
                    "invalid sensor_id '{}': must be 1-{} bytes without control characters",
                    id.escape_default(),
                    MAX_SENSOR_ID_LEN
                )
            }
            ValidationError::InvalidDistance => write!(f, "distance must be a finite number"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A decoded, validated sensor message.
#[derive(Clone, Debug, PartialEq)]
pub struct SensorMessage {
    pub sensor_id: String,
    pub distance: f64,
    /// Sensor-supplied time, if any
    pub timestamp: Option<DateTime<Utc>>,
}

impl SensorMessage {
    /// Turn the message into a classified reading.
    ///
    /// `received_at` is used when the sensor did not supply a timestamp.
    pub fn into_reading(self, received_at: DateTime<Utc>) -> (String, SensorReading) {
        let timestamp = self.timestamp.unwrap_or(received_at);
        (self.sensor_id, SensorReading::new(self.distance, timestamp))
    }
}

/// Decode and validate a single framed message.
///
/// Expected shape:
/// {
///   "sensor_id": "s1",
///   "distance": 12.5,
///   "timestamp": "2026-10-19T12:00:00Z"   (optional)
/// }
///
/// Unknown fields are ignored. A `timestamp` that cannot be read falls back
/// to receipt time rather than rejecting the reading.
pub fn parse_message(frame: &[u8]) -> Result<SensorMessage, ValidationError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let object = value.as_object().ok_or(ValidationError::NotAnObject)?;

    let sensor_id = match object.get("sensor_id") {
        None | Some(Value::Null) => return Err(ValidationError::MissingSensorId),
        Some(Value::String(id)) => id.clone(),
        Some(other) => return Err(ValidationError::InvalidSensorId(other.to_string())),
    };
    if !is_valid_sensor_id(&sensor_id) {
        return Err(ValidationError::InvalidSensorId(sensor_id));
    }

    let distance = match object.get("distance") {
        None | Some(Value::Null) => return Err(ValidationError::MissingDistance),
        Some(v) => v.as_f64().ok_or(ValidationError::InvalidDistance)?,
    };
    if !distance.is_finite() {
        return Err(ValidationError::InvalidDistance);
    }

    let timestamp = match object.get("timestamp") {
        None | Some(Value::Null) => None,
        Some(raw) => {
            let parsed = raw.as_str().and_then(parse_timestamp);
            if parsed.is_none() {
                debug!(
                    sensor_id = %sensor_id,
                    timestamp = %raw,
                    "Unreadable sensor timestamp, using receipt time"
                );
            }
            parsed
        }
    };

    Ok(SensorMessage {
        sensor_id,
        distance,
        timestamp,
    })
}

/// Line breaks and other control characters are rejected; the log quotes everything else.
fn is_valid_sensor_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_SENSOR_ID_LEN && !id.chars().any(char::is_control)
}

/// Accepts RFC 3339 (any offset) or a naive `YYYY-MM-DD HH:MM:SS`, read as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn test_valid_sensor_ids() {
        assert!(is_valid_sensor_id("s1"));
        assert!(is_valid_sensor_id("sensor-42"));
        assert!(is_valid_sensor_id("front door/left"));
        assert!(is_valid_sensor_id("front,door"));
        assert!(is_valid_sensor_id("quote\"d"));
        assert!(is_valid_sensor_id(&"x".repeat(MAX_SENSOR_ID_LEN)));
    }

    #[test]
    fn test_invalid_sensor_ids() {
        assert!(!is_valid_sensor_id(""));
        assert!(!is_valid_sensor_id("a\nb"));
        assert!(!is_valid_sensor_id("tab\there"));
        assert!(!is_valid_sensor_id(&"x".repeat(MAX_SENSOR_ID_LEN + 1)));
    }

    #[test]
    fn test_timestamp_formats() {
        let rfc = parse_timestamp("2026-10-19T12:30:00Z").unwrap();
        let naive = parse_timestamp("2026-10-19 12:30:00").unwrap();
        assert_eq!(rfc, naive);

        let offset = parse_timestamp("2026-10-19T14:30:00+02:00").unwrap();
        assert_eq!(offset, rfc);

        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("2026-10-19").is_none());
    }
}
