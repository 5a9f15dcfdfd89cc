use crate::reading::SensorReading;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Point-in-time copy of every known sensor's latest reading
pub type Snapshot = HashMap<String, SensorReading>;

/// In-memory latest-reading-per-sensor store.
///
/// A single coarse `RwLock` guards the map so `snapshot()` always observes a
/// consistent state across all sensors, never a half-applied upsert. Locks are
/// held only for the map operation itself; callers do their I/O on the returned
/// copy after the guard is dropped.
#[derive(Debug, Default)]
pub struct StateStore {
    readings: RwLock<HashMap<String, SensorReading>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the reading for `sensor_id`, returning the previous one.
    ///
    /// Full replace, not a merge. Concurrent writers for the same id resolve as
    /// last-write-wins in lock acquisition order.
    pub fn upsert(&self, sensor_id: &str, reading: SensorReading) -> Option<SensorReading> {
        let mut readings = self.readings.write().unwrap_or_else(PoisonError::into_inner);
        readings.insert(sensor_id.to_string(), reading)
    }

    /// Copy the whole mapping out under the read lock.
    pub fn snapshot(&self) -> Snapshot {
        self.readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get the latest reading for one sensor
    pub fn get(&self, sensor_id: &str) -> Option<SensorReading> {
        self.readings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(sensor_id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.readings.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
