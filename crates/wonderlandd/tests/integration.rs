//! Integration tests for wonderlandd
//!
//! These tests drive a real server over its Unix socket.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use wonderland_config::ServerConfig;
use wonderland_ipc::{Channel, ChannelFactory, IpcClient, IpcServer, RabbitHole, ServerHandle};
use wonderland_util::{ChannelId, PROTOCOL_VERSION};

fn start_server(dir: &TempDir) -> (IpcServer<Bytes>, ServerHandle) {
    let mut channel_dir = dir.path().as_os_str().to_owned();
    channel_dir.push("/");

    let config = ServerConfig::default()
        .with_socket_path(dir.path().join("wonderland"))
        .with_channel_dir(PathBuf::from(channel_dir));

    let server: IpcServer<Bytes> = IpcServer::new(config);
    let handle = server.start().unwrap();
    (server, handle)
}

async fn connect(handle: &ServerHandle) -> IpcClient {
    IpcClient::connect(handle.socket_path()).await.unwrap()
}

#[tokio::test]
async fn test_version_then_rabbit_holes_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let (server, handle) = start_server(&dir);

    let mut client = connect(&handle).await;
    let reply = client.request(b"VERSION").await.unwrap();
    assert_eq!(reply, Bytes::from(server.config().server_version.clone()));
    drop(client);

    let mut client = connect(&handle).await;
    let first = client.request(b"RABBITHOLEignored").await.unwrap();
    assert!(first.ends_with(b"rabbithole-0"));
    drop(client);

    let mut client = connect(&handle).await;
    let second = client.open_channel().await.unwrap();
    assert_eq!(second, dir.path().join("rabbithole-1"));
}

#[tokio::test]
async fn test_channel_ids_are_dense_in_request_order() {
    let dir = tempfile::tempdir().unwrap();
    let (server, handle) = start_server(&dir);

    let mut paths = Vec::new();
    for _ in 0..3 {
        let mut client = connect(&handle).await;
        for _ in 0..2 {
            paths.push(client.open_channel().await.unwrap());
        }
    }

    let expected: Vec<PathBuf> = (0..6)
        .map(|id| dir.path().join(format!("rabbithole-{id}")))
        .collect();
    assert_eq!(paths, expected);

    let ids: Vec<_> = server
        .channels()
        .channels()
        .iter()
        .map(|c| c.id().index())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_version_reply_is_length_prefixed() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let dir = tempfile::tempdir().unwrap();
    let (server, handle) = start_server(&dir);

    let mut stream = tokio::net::UnixStream::connect(handle.socket_path())
        .await
        .unwrap();
    let mut request = Vec::new();
    request.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    request.extend_from_slice(&7u32.to_be_bytes());
    request.extend_from_slice(b"VERSION");
    stream.write_all(&request).await.unwrap();

    let version = server.config().server_version.as_bytes();
    let mut reply = vec![0u8; 4 + version.len()];
    stream.read_exact(&mut reply).await.unwrap();

    assert_eq!(&reply[..4], &(version.len() as u32).to_be_bytes());
    assert_eq!(&reply[4..], version);
}

#[tokio::test]
async fn test_version_mismatch_gets_no_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (server, handle) = start_server(&dir);

    let mut client = connect(&handle)
        .await
        .with_protocol_version(PROTOCOL_VERSION + 41);
    let result = tokio::time::timeout(Duration::from_secs(5), client.request(b"RABBITHOLE"))
        .await
        .unwrap();

    assert!(result.is_err());
    assert!(server.channels().is_empty());

    // The server moves on to the next connection
    let mut client = connect(&handle).await;
    assert!(client.open_channel().await.is_ok());
}

#[tokio::test]
async fn test_sessions_are_serialized() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, handle) = start_server(&dir);

    let mut first = connect(&handle).await;
    first.version().await.unwrap();

    // Queued in the backlog until the first session ends
    let mut second = connect(&handle).await;
    second.send(b"VERSION").await.unwrap();
    let waiting = tokio::time::timeout(Duration::from_millis(200), second.recv()).await;
    assert!(waiting.is_err());

    drop(first);

    let reply = tokio::time::timeout(Duration::from_secs(5), second.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(!reply.is_empty());
}

/// Hands out `RabbitHole`s and keeps a handle to each so signals can be read
#[derive(Default)]
struct RecordingFactory {
    made: Arc<Mutex<Vec<Arc<RabbitHole>>>>,
}

impl ChannelFactory for RecordingFactory {
    fn create(&self, id: ChannelId, base_dir: &Path, prefix: &str) -> Arc<dyn Channel> {
        let hole = Arc::new(RabbitHole::new(id, base_dir, prefix));
        self.made.lock().unwrap().push(hole.clone());
        hole
    }
}

#[tokio::test]
async fn test_publish_wakes_allocated_channels() {
    let dir = tempfile::tempdir().unwrap();
    let factory = RecordingFactory::default();
    let made = factory.made.clone();

    let config = ServerConfig::default()
        .with_socket_path(dir.path().join("wonderland"))
        .with_channel_dir(dir.path().join("holes/"));
    let server: IpcServer<Bytes> = IpcServer::with_channel_factory(config, Box::new(factory));
    let handle = server.start().unwrap();

    let mut client = connect(&handle).await;
    let first = client.open_channel().await.unwrap();
    let second = client.open_channel().await.unwrap();

    let holes = made.lock().unwrap().clone();
    assert_eq!(holes.len(), 2);
    assert_eq!(holes[0].path(), first.as_path());
    assert_eq!(holes[1].path(), second.as_path());
    assert!(holes.iter().all(|hole| hole.pending_signals() == 0));

    let broadcasts = server.broadcasts();
    let event = Arc::new(Bytes::from_static(b"player_killed"));

    // Producers run outside the server's task
    let producer = {
        let broadcasts = broadcasts.clone();
        let event = event.clone();
        tokio::task::spawn_blocking(move || broadcasts.publish(event))
    };
    assert_eq!(producer.await.unwrap(), 0);

    for hole in &holes {
        tokio::time::timeout(Duration::from_secs(5), hole.signalled())
            .await
            .unwrap();
        assert_eq!(hole.pending_signals(), 1);
    }

    assert_eq!(broadcasts.remove(&event), 1);
    assert_eq!(broadcasts.occupied(), 0);
    assert_eq!(broadcasts.slot_count(), 1);
    assert!(holes.iter().all(|hole| hole.pending_signals() == 1));
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, handle) = start_server(&dir);
    let socket_path = handle.socket_path().to_path_buf();

    handle.shutdown();

    assert!(IpcClient::connect(&socket_path).await.is_err());
}
