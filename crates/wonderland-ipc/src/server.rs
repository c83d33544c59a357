//! IPC server implementation

use nix::sys::socket::{bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr};
use std::future::Future;
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wonderland_config::ServerConfig;
use wonderland_util::PROTOCOL_VERSION;

use crate::frame::{encode_response, read_header, read_payload, FrameResult};
use crate::{
    BroadcastRegistry, ChannelFactory, ChannelRegistry, Dispatcher, IpcError, IpcResult,
    RabbitHoleFactory,
};

/// Pending connections the kernel queues while a session is active
pub const LISTEN_BACKLOG: i32 = 5;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// IPC Server
///
/// Owns the channel registry and the broadcast registry. Producers publish
/// through the handle returned by [`IpcServer::broadcasts`].
pub struct IpcServer<E = bytes::Bytes> {
    config: ServerConfig,
    channels: Arc<ChannelRegistry>,
    broadcasts: Arc<BroadcastRegistry<E>>,
    started: AtomicBool,
}

impl<E> IpcServer<E> {
    /// Create a new IPC server
    pub fn new(config: ServerConfig) -> Self {
        Self::with_channel_factory(config, Box::new(RabbitHoleFactory))
    }

    pub fn with_channel_factory(config: ServerConfig, factory: Box<dyn ChannelFactory>) -> Self {
        let channels = Arc::new(ChannelRegistry::with_factory(
            config.channel_dir.clone(),
            config.channel_prefix.clone(),
            factory,
        ));
        let broadcasts = Arc::new(BroadcastRegistry::new(channels.clone()));

        Self {
            config,
            channels,
            broadcasts,
            started: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn channels(&self) -> Arc<ChannelRegistry> {
        self.channels.clone()
    }

    /// Shared handle for event producers
    pub fn broadcasts(&self) -> Arc<BroadcastRegistry<E>> {
        self.broadcasts.clone()
    }

    /// Bind the socket and spawn the accept loop.
    ///
    /// Must be called from within a tokio runtime. Socket setup failures are
    /// returned; once listening, the loop runs until the handle is shut down.
    /// A server starts at most once, so only one accept loop ever exists.
    pub fn start(&self) -> IpcResult<ServerHandle> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(IpcError::AlreadyStarted);
        }

        let socket_path = self.config.socket_path.clone();
        let listener = match bind_listener(&socket_path) {
            Ok(listener) => listener,
            Err(source) => {
                self.started.store(false, Ordering::Release);
                return Err(IpcError::Bind {
                    path: socket_path,
                    source,
                });
            }
        };

        info!(
            path = %socket_path.display(),
            protocol_version = PROTOCOL_VERSION,
            "IPC server listening"
        );

        let handler = ConnectionHandler::new(
            Dispatcher::new(self.channels.clone(), self.config.server_version.clone()),
            self.config.max_payload_bytes,
            self.config.read_timeout,
        );
        let task = tokio::spawn(accept_loop(listener, handler));

        Ok(ServerHandle { socket_path, task })
    }
}

/// Handle to a running accept loop
#[derive(Debug)]
pub struct ServerHandle {
    socket_path: PathBuf,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop accepting, drop any active session and remove the socket file
    pub fn shutdown(self) {
        self.task.abort();
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.socket_path.display(), error = %e, "Failed to remove socket");
            }
        }
        info!("IPC server stopped");
    }
}

/// Create, bind and listen on the socket with our own backlog
fn bind_listener(path: &Path) -> std::io::Result<UnixListener> {
    // Remove stale socket
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        None,
    )?;
    let addr = UnixAddr::new(path)?;
    bind(fd.as_raw_fd(), &addr)?;
    listen(&fd, Backlog::new(LISTEN_BACKLOG)?)?;

    // Owner only: the single trusted peer runs as the same user
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

    UnixListener::from_std(std::os::unix::net::UnixListener::from(fd))
}

/// Accept connections one at a time, forever
async fn accept_loop(listener: UnixListener, handler: ConnectionHandler) {
    loop {
        debug!("Awaiting new connection");

        match listener.accept().await {
            Ok((stream, _)) => {
                let uid = get_peer_uid(&stream);
                info!(uid = ?uid, "Connection established");

                // The next accept waits until this session is over
                match handler.handle(stream).await {
                    Ok(()) => info!("Client disconnected"),
                    Err(e) => warn!(error = %e, "Connection closed"),
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Runs the receive loop for a single connection
#[derive(Debug, Clone)]
pub struct ConnectionHandler {
    dispatcher: Dispatcher,
    max_payload_bytes: u32,
    read_timeout: Option<Duration>,
}

impl ConnectionHandler {
    pub fn new(
        dispatcher: Dispatcher,
        max_payload_bytes: u32,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            dispatcher,
            max_payload_bytes,
            read_timeout,
        }
    }

    /// Serve requests until the peer disconnects.
    ///
    /// A clean disconnect between frames is `Ok`. A version mismatch, an
    /// oversized payload or an I/O failure ends the connection with an error
    /// and nothing is sent back.
    pub async fn handle(&self, mut stream: UnixStream) -> IpcResult<()> {
        loop {
            let Some(header) = self.timed(read_header(&mut stream)).await? else {
                return Ok(());
            };

            if header.version != PROTOCOL_VERSION {
                warn!(
                    received = header.version,
                    expected = PROTOCOL_VERSION,
                    "IPC protocol version mismatch"
                );
                return Err(IpcError::VersionMismatch {
                    received: header.version,
                    expected: PROTOCOL_VERSION,
                });
            }

            if header.payload_len > self.max_payload_bytes {
                warn!(
                    payload_len = header.payload_len,
                    max = self.max_payload_bytes,
                    "Payload too large"
                );
                return Err(IpcError::PayloadTooLarge {
                    len: header.payload_len,
                    max: self.max_payload_bytes,
                });
            }

            let payload = self
                .timed(read_payload(&mut stream, header.payload_len as usize))
                .await?;

            debug!(
                version = header.version,
                payload_len = header.payload_len,
                payload = %String::from_utf8_lossy(&payload),
                "Request received"
            );

            if let Some(response) = self.dispatcher.dispatch(&payload) {
                let frame = encode_response(&response)?;
                stream.write_all(&frame).await?;
                stream.flush().await?;
            }
        }
    }

    async fn timed<T>(&self, read: impl Future<Output = FrameResult<T>>) -> IpcResult<T> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| IpcError::Timeout(limit))?
                .map_err(IpcError::from),
            None => read.await.map_err(IpcError::from),
        }
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_request;
    use crate::IpcClient;
    use tempfile::tempdir;
    use tokio::io::AsyncReadExt;

    fn test_config(dir: &Path) -> ServerConfig {
        ServerConfig::default()
            .with_socket_path(dir.join("wonderland"))
            .with_channel_dir(dir.join("holes/"))
    }

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let server: IpcServer = IpcServer::new(test_config(dir.path()));

        let handle = server.start().unwrap();

        assert!(handle.socket_path().exists());
        assert!(handle.is_running());
        let mode = std::fs::metadata(handle.socket_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn stale_socket_file_is_replaced() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(&config.socket_path, b"stale").unwrap();

        let server: IpcServer = IpcServer::new(config);
        let handle = server.start().unwrap();

        let mut client = IpcClient::connect(handle.socket_path()).await.unwrap();
        assert_eq!(client.version().await.unwrap(), server.config().server_version);
    }

    #[tokio::test]
    async fn bind_failure_is_returned() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"").unwrap();

        let config = ServerConfig::default().with_socket_path(blocker.join("wonderland"));
        let server: IpcServer = IpcServer::new(config);

        assert!(matches!(server.start(), Err(IpcError::Bind { .. })));
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let dir = tempdir().unwrap();
        let server: IpcServer = IpcServer::new(test_config(dir.path()));
        let handle = server.start().unwrap();

        assert!(matches!(server.start(), Err(IpcError::AlreadyStarted)));

        // The first accept loop still owns the socket
        let mut client = IpcClient::connect(handle.socket_path()).await.unwrap();
        assert_eq!(client.version().await.unwrap(), server.config().server_version);
        assert!(handle.is_running());
    }

    #[tokio::test]
    async fn start_can_be_retried_after_bind_failure() {
        let dir = tempdir().unwrap();
        let parent = dir.path().join("later");
        std::fs::write(&parent, b"").unwrap();

        let config = ServerConfig::default().with_socket_path(parent.join("wonderland"));
        let server: IpcServer = IpcServer::new(config);
        assert!(matches!(server.start(), Err(IpcError::Bind { .. })));

        std::fs::remove_file(&parent).unwrap();
        assert!(server.start().is_ok());
    }

    #[tokio::test]
    async fn shutdown_removes_socket() {
        let dir = tempdir().unwrap();
        let server: IpcServer = IpcServer::new(test_config(dir.path()));
        let handle = server.start().unwrap();
        let path = handle.socket_path().to_path_buf();

        handle.shutdown();

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn version_mismatch_closes_without_reply() {
        let dir = tempdir().unwrap();
        let server: IpcServer = IpcServer::new(test_config(dir.path()));
        let handle = server.start().unwrap();

        let mut stream = UnixStream::connect(handle.socket_path()).await.unwrap();
        let frame = encode_request(PROTOCOL_VERSION + 1, b"VERSION").unwrap();
        stream.write_all(&frame).await.unwrap();

        // Unread payload bytes may turn the close into a reset; either way nothing arrives
        let mut buf = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn oversized_payload_closes_connection() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path()).with_max_payload_bytes(16);
        let server: IpcServer = IpcServer::new(config);
        let handle = server.start().unwrap();

        let mut stream = UnixStream::connect(handle.socket_path()).await.unwrap();
        // Header only: the server must not wait for the announced payload
        stream
            .write_all(&[0, 0, 0, PROTOCOL_VERSION as u8, 0, 0, 0, 17])
            .await
            .unwrap();

        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
        assert!(server.channels().is_empty());
    }

    #[tokio::test]
    async fn unknown_command_keeps_connection_open() {
        let dir = tempdir().unwrap();
        let server: IpcServer = IpcServer::new(test_config(dir.path()));
        let handle = server.start().unwrap();

        let mut client = IpcClient::connect(handle.socket_path()).await.unwrap();
        client.send(b"HELLO").await.unwrap();

        let silent = tokio::time::timeout(Duration::from_millis(200), client.recv()).await;
        assert!(silent.is_err(), "unknown command must not be answered");

        assert_eq!(client.version().await.unwrap(), server.config().server_version);
    }

    #[tokio::test]
    async fn stalled_peer_times_out() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path()).with_read_timeout(Duration::from_millis(100));
        let server: IpcServer = IpcServer::new(config);
        let handle = server.start().unwrap();

        let mut stalled = UnixStream::connect(handle.socket_path()).await.unwrap();
        stalled.write_all(&[0, 0, 0]).await.unwrap();

        // Once the stalled session times out the next client is served
        let mut client = IpcClient::connect(handle.socket_path()).await.unwrap();
        let version = tokio::time::timeout(Duration::from_secs(5), client.version())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(version, server.config().server_version);
    }
}
