use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

mod validation;

pub use validation::{parse_message, SensorMessage, ValidationError, MAX_SENSOR_ID_LEN};

/// Upper bound (exclusive) of the CRITICAL tier
pub const CRITICAL_BELOW: f64 = 10.0;

/// Upper bound (exclusive) of the WARNING tier
pub const WARNING_BELOW: f64 = 30.0;

/// Upper bound (exclusive) of the CAUTION tier; everything at or above is SAFE
pub const CAUTION_BELOW: f64 = 50.0;

/// Severity tier derived solely from a distance reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Critical,
    Warning,
    Caution,
    Safe,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Critical => "CRITICAL",
            Status::Warning => "WARNING",
            Status::Caution => "CAUTION",
            Status::Safe => "SAFE",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a distance into its severity tier.
///
/// Tiers are half-open intervals: `[0, 10)` CRITICAL, `[10, 30)` WARNING,
/// `[30, 50)` CAUTION, `[50, ∞)` SAFE. Negative distances fall into CRITICAL.
/// There is no hysteresis, a value hovering on a boundary flips tiers.
pub fn classify(distance: f64) -> Status {
    if distance < CRITICAL_BELOW {
        Status::Critical
    } else if distance < WARNING_BELOW {
        Status::Warning
    } else if distance < CAUTION_BELOW {
        Status::Caution
    } else {
        Status::Safe
    }
}

/// Latest known state of a single sensor.
///
/// This is the value side of the state store; the sensor identifier is the key.
/// Serialized as `{"distance": .., "status": .., "timestamp": ..}` in snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub distance: f64,
    pub status: Status,
    /// Second resolution, UTC
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Build a reading, classifying the distance and truncating the timestamp to whole seconds.
    pub fn new(distance: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            distance,
            status: classify(distance),
            timestamp: timestamp.trunc_subsecs(0),
        }
    }
}
