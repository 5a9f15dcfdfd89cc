use crate::persistence::{PersistenceLog, PersistenceRecord};
use crate::reading::{parse_message, SensorMessage, SensorReading};
use crate::state::StateStore;
use crate::subscription::Broadcaster;
use chrono::Utc;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reply sent after a reading is accepted
pub const ACK: &[u8; 3] = b"ACK";

/// Shared sinks every accepted reading flows into
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<StateStore>,
    log: Arc<PersistenceLog>,
    broadcaster: Arc<Broadcaster>,
}

/// Result of ingesting one reading
#[derive(Debug, Clone)]
pub struct AcceptedReading {
    pub sensor_id: String,
    pub reading: SensorReading,
    /// False if the durable append failed (the reading is still live)
    pub persisted: bool,
}

impl Ingestor {
    pub fn new(
        store: Arc<StateStore>,
        log: Arc<PersistenceLog>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            log,
            broadcaster,
        }
    }

    /// Classify, store, persist and publish one validated message.
    ///
    /// Returns once the record is on disk (or the write has failed), so an
    /// acknowledgment sent afterwards never precedes durability.
    pub async fn ingest(&self, message: SensorMessage) -> AcceptedReading {
        let (sensor_id, reading) = message.into_reading(Utc::now());

        self.store.upsert(&sensor_id, reading.clone());

        let record = PersistenceRecord::new(&sensor_id, &reading);
        let persisted = match self.log.append_async(record).await {
            Ok(()) => true,
            Err(e) => {
                error!(sensor_id = %sensor_id, error = %e, "Failed to persist reading");
                false
            }
        };

        if let Err(e) = self.broadcaster.publish() {
            error!(sensor_id = %sensor_id, error = %e, "Failed to publish snapshot");
        }

        debug!(
            sensor_id = %sensor_id,
            distance = reading.distance,
            status = %reading.status,
            "Reading accepted"
        );

        AcceptedReading {
            sensor_id,
            reading,
            persisted,
        }
    }
}

/// Per-connection limits
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    pub max_frame_bytes: usize,
    pub idle_timeout: Option<Duration>,
}

impl From<&crate::config::IngestConfig> for HandlerSettings {
    fn from(config: &crate::config::IngestConfig) -> Self {
        Self {
            max_frame_bytes: config.max_frame_bytes,
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Why a sensor connection closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    PeerClosed,
    ReadError,
    WriteError,
    FrameTooLong,
    IdleTimeout,
    Shutdown,
}

/// Serves one sensor connection.
///
/// Messages are newline-delimited JSON; a trailing `\r` is tolerated and blank
/// lines are skipped. Transport reads are buffered by the codec, so several
/// messages in one packet or one message split across packets both frame
/// correctly.
pub struct ConnectionHandler {
    peer: Option<SocketAddr>,
    ingestor: Ingestor,
    settings: HandlerSettings,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        peer: Option<SocketAddr>,
        ingestor: Ingestor,
        settings: HandlerSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            peer,
            ingestor,
            settings,
            cancel,
        }
    }

    /// Read, validate and ingest messages until the connection ends.
    ///
    /// Shutdown is only observed while waiting for the next frame, so a message
    /// already received is always fully ingested and acknowledged. The stream
    /// is dropped (closed) on return.
    pub async fn run<S>(self, stream: S) -> ConnectionEnd
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let peer = self.peer;
        info!(peer = ?peer, "Sensor connected");

        let (reader, mut writer) = tokio::io::split(stream);
        let codec = AnyDelimiterCodec::new_with_max_length(
            b"\n".to_vec(),
            Vec::new(),
            self.settings.max_frame_bytes,
        );
        let mut frames = FramedRead::new(reader, codec);
        let idle_timeout = self.settings.idle_timeout;

        let mut accepted: u64 = 0;
        let mut rejected: u64 = 0;

        let end = loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break ConnectionEnd::Shutdown,
                next = async {
                    match idle_timeout {
                        Some(limit) => tokio::time::timeout(limit, frames.next()).await.ok(),
                        None => Some(frames.next().await),
                    }
                } => next,
            };

            let frame = match next {
                None => break ConnectionEnd::IdleTimeout,
                Some(None) => break ConnectionEnd::PeerClosed,
                Some(Some(Ok(frame))) => frame,
                Some(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => {
                    warn!(
                        peer = ?peer,
                        max_frame_bytes = self.settings.max_frame_bytes,
                        "Sensor message exceeds maximum length, closing connection"
                    );
                    break ConnectionEnd::FrameTooLong;
                }
                Some(Some(Err(AnyDelimiterCodecError::Io(e)))) => {
                    warn!(peer = ?peer, error = %e, "Sensor connection read error");
                    break ConnectionEnd::ReadError;
                }
            };

            let payload = trim_frame(&frame);
            if payload.is_empty() {
                continue;
            }

            let message = match parse_message(payload) {
                Ok(message) => message,
                Err(e) => {
                    rejected += 1;
                    warn!(peer = ?peer, error = %e, "Discarding invalid sensor message");
                    continue;
                }
            };

            self.ingestor.ingest(message).await;
            accepted += 1;

            if let Err(e) = send_ack(&mut writer).await {
                warn!(peer = ?peer, error = %e, "Failed to acknowledge reading");
                break ConnectionEnd::WriteError;
            }
        };

        let _ = writer.shutdown().await;

        info!(
            peer = ?peer,
            reason = ?end,
            accepted = accepted,
            rejected = rejected,
            "Sensor disconnected"
        );
        end
    }
}

async fn send_ack<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(ACK).await?;
    writer.flush().await
}

/// Strip a trailing carriage return and surrounding ASCII whitespace
fn trim_frame(frame: &[u8]) -> &[u8] {
    let start = frame
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(frame.len());
    let end = frame
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &frame[start..end]
}
