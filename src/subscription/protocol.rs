use crate::reading::SensorReading;
use crate::state::Snapshot;
use std::collections::BTreeMap;

/// Server → Client: full state snapshot.
///
/// Wire shape is a bare JSON object keyed by sensor id:
/// {
///   "s1": {"distance": 5.0, "status": "CRITICAL", "timestamp": "2026-10-19T12:00:00Z"},
///   "s2": {"distance": 72.3, "status": "SAFE", "timestamp": "2026-10-19T12:00:01Z"}
/// }
///
/// Keys are emitted in sorted order so identical states encode identically.
pub fn encode_snapshot(snapshot: &Snapshot) -> serde_json::Result<String> {
    let ordered: BTreeMap<&str, &SensorReading> = snapshot
        .iter()
        .map(|(id, reading)| (id.as_str(), reading))
        .collect();
    serde_json::to_string(&ordered)
}

/// Client-side decode of a snapshot frame
pub fn decode_snapshot(frame: &str) -> serde_json::Result<Snapshot> {
    serde_json::from_str(frame)
}

/// Client → Server events that matter to a subscriber session
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Any text frame: resend the current snapshot to this client
    Refresh,
    /// Client closed the connection or the transport failed
    Close,
}
