// Sensor ingestion: TCP listener and per-connection handler

mod handler;
mod listener;

pub use handler::{
    AcceptedReading, ConnectionEnd, ConnectionHandler, HandlerSettings, Ingestor, ACK,
};
pub use listener::IngestListener;

#[cfg(test)]
mod tests;
