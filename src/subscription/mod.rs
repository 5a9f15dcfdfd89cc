// Snapshot fan-out to subscriber dashboards

pub mod broadcaster;
pub mod manager;
pub mod protocol;

pub use broadcaster::{Broadcaster, SnapshotFrame, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
pub use manager::{SessionEnd, SubscriberSession};
pub use protocol::{decode_snapshot, encode_snapshot, ClientEvent};
