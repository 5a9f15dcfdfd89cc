// Latest-reading state store

mod store;

pub use store::{Snapshot, StateStore};
