use super::*;
use crate::persistence::PersistenceLog;
use crate::reading::Status;
use crate::state::StateStore;
use crate::subscription::Broadcaster;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Harness {
    _dir: TempDir,
    log_path: std::path::PathBuf,
    store: Arc<StateStore>,
    broadcaster: Arc<Broadcaster>,
    ingestor: Ingestor,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("sensor_data.csv");
    let store = Arc::new(StateStore::new());
    let log = Arc::new(PersistenceLog::open(&log_path).unwrap());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&store), 8));
    let ingestor = Ingestor::new(Arc::clone(&store), log, Arc::clone(&broadcaster));

    Harness {
        _dir: dir,
        log_path,
        store,
        broadcaster,
        ingestor,
    }
}

fn settings() -> HandlerSettings {
    HandlerSettings {
        max_frame_bytes: 256,
        idle_timeout: None,
    }
}

fn spawn_handler(
    h: &Harness,
    settings: HandlerSettings,
    cancel: CancellationToken,
) -> (DuplexStream, JoinHandle<ConnectionEnd>) {
    let (client, server) = tokio::io::duplex(4096);
    let handler = ConnectionHandler::new(None, h.ingestor.clone(), settings, cancel);
    (client, tokio::spawn(handler.run(server)))
}

async fn read_ack(client: &mut DuplexStream) {
    let mut buf = [0u8; 3];
    tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
        .await
        .expect("timed out waiting for ACK")
        .unwrap();
    assert_eq!(&buf, ACK);
}

#[tokio::test]
async fn test_valid_reading_is_stored_persisted_and_acked() {
    let h = harness();
    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());

    client
        .write_all(b"{\"sensor_id\":\"s1\",\"distance\":5.0}\n")
        .await
        .unwrap();
    read_ack(&mut client).await;

    // Durable before the ACK was sent
    let contents = std::fs::read_to_string(&h.log_path).unwrap();
    let last = contents.lines().last().unwrap();
    assert!(last.ends_with(",s1,5.0,CRITICAL"), "unexpected line: {}", last);

    let stored = h.store.get("s1").unwrap();
    assert_eq!(stored.distance, 5.0);
    assert_eq!(stored.status, Status::Critical);

    client.shutdown().await.unwrap();
    assert_eq!(handle.await.unwrap(), ConnectionEnd::PeerClosed);
}

#[tokio::test]
async fn test_invalid_message_is_discarded_without_ack() {
    let h = harness();
    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());

    client.write_all(b"{\"sensor_id\":\"s1\"}\n").await.unwrap();
    client.write_all(b"not json at all\n").await.unwrap();
    client
        .write_all(b"{\"sensor_id\":\"s2\",\"distance\":55}\n")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(handle.await.unwrap(), ConnectionEnd::PeerClosed);

    // Exactly one ACK, for s2
    let mut replies = Vec::new();
    client.read_to_end(&mut replies).await.unwrap();
    assert_eq!(replies, b"ACK");

    assert!(h.store.get("s1").is_none());
    assert_eq!(h.store.get("s2").unwrap().status, Status::Safe);

    let contents = std::fs::read_to_string(&h.log_path).unwrap();
    assert_eq!(contents.lines().count(), 2); // header + s2
}

#[tokio::test]
async fn test_two_messages_in_one_write() {
    let h = harness();
    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());

    client
        .write_all(
            b"{\"sensor_id\":\"a\",\"distance\":12}\n{\"sensor_id\":\"b\",\"distance\":33}\n",
        )
        .await
        .unwrap();
    read_ack(&mut client).await;
    read_ack(&mut client).await;

    assert_eq!(h.store.get("a").unwrap().status, Status::Warning);
    assert_eq!(h.store.get("b").unwrap().status, Status::Caution);

    client.shutdown().await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_message_split_across_writes() {
    let h = harness();
    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());

    client.write_all(b"{\"sensor_id\":\"s1\",").await.unwrap();
    client.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.store.get("s1").is_none());

    client.write_all(b"\"distance\":49.99}\r\n").await.unwrap();
    read_ack(&mut client).await;

    assert_eq!(h.store.get("s1").unwrap().status, Status::Caution);

    client.shutdown().await.unwrap();
    handle.await.unwrap();

    let contents = std::fs::read_to_string(&h.log_path).unwrap();
    assert_eq!(contents.lines().count(), 2);
}

#[tokio::test]
async fn test_final_message_without_newline_is_accepted() {
    let h = harness();
    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());

    client
        .write_all(b"{\"sensor_id\":\"tail\",\"distance\":70}")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    handle.await.unwrap();
    assert_eq!(h.store.get("tail").unwrap().status, Status::Safe);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let h = harness();
    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());

    let mut huge = vec![b'x'; 1024];
    huge.push(b'\n');
    client.write_all(&huge).await.unwrap();

    assert_eq!(handle.await.unwrap(), ConnectionEnd::FrameTooLong);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_idle_connection_is_reaped() {
    let h = harness();
    let settings = HandlerSettings {
        max_frame_bytes: 256,
        idle_timeout: Some(Duration::from_millis(50)),
    };
    let (_client, handle) = spawn_handler(&h, settings, CancellationToken::new());

    let end = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(end, ConnectionEnd::IdleTimeout);
}

#[tokio::test]
async fn test_shutdown_closes_waiting_handler() {
    let h = harness();
    let cancel = CancellationToken::new();
    let (mut client, handle) = spawn_handler(&h, settings(), cancel.clone());

    client
        .write_all(b"{\"sensor_id\":\"s1\",\"distance\":20}\n")
        .await
        .unwrap();
    read_ack(&mut client).await;

    cancel.cancel();
    assert_eq!(handle.await.unwrap(), ConnectionEnd::Shutdown);

    // Handler released its end of the stream
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn test_accepted_reading_is_published() {
    let h = harness();
    let mut sub = h.broadcaster.register(None).unwrap();
    assert_eq!(&*sub.take_initial().unwrap(), "{}");

    let (mut client, handle) = spawn_handler(&h, settings(), CancellationToken::new());
    client
        .write_all(b"{\"sensor_id\":\"s1\",\"distance\":5.0,\"timestamp\":\"2026-10-19T08:00:00Z\"}\n")
        .await
        .unwrap();
    read_ack(&mut client).await;

    let frame = sub.next_frame().await.unwrap();
    let snapshot = crate::subscription::decode_snapshot(&frame).unwrap();
    let s1 = &snapshot["s1"];
    assert_eq!(s1.distance, 5.0);
    assert_eq!(s1.status, Status::Critical);
    assert_eq!(s1.timestamp.to_rfc3339(), "2026-10-19T08:00:00+00:00");

    client.shutdown().await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_ingestor_reports_persisted() {
    let h = harness();
    let message = crate::reading::parse_message(b"{\"sensor_id\":\"s1\",\"distance\":10}").unwrap();

    let accepted = h.ingestor.ingest(message).await;
    assert_eq!(accepted.sensor_id, "s1");
    assert_eq!(accepted.reading.status, Status::Warning);
    assert!(accepted.persisted);
}
