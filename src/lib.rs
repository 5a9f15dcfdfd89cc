// Sensor reading model, classification and message validation
pub mod reading;

// Latest-reading state store
pub mod state;

// Append-only durable reading log
pub mod persistence;

// Snapshot fan-out to subscribers
pub mod subscription;

// Sensor TCP ingestion
pub mod ingest;

// Subscriber WebSocket API
pub mod api;

// Configuration
pub mod config;

// Server assembly and shutdown
pub mod server;
