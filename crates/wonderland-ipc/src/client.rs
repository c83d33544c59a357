//! IPC client implementation

use bytes::Bytes;
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use wonderland_util::PROTOCOL_VERSION;

use crate::frame::{encode_request, read_payload, RESPONSE_HEADER_LEN};
use crate::{Command, IpcError, IpcResult};

/// IPC Client for talking to the wonderland server
pub struct IpcClient {
    stream: UnixStream,
    protocol_version: u32,
}

impl IpcClient {
    /// Connect to the server
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let stream = UnixStream::connect(socket_path).await?;

        Ok(Self {
            stream,
            protocol_version: PROTOCOL_VERSION,
        })
    }

    /// Override the version sent in request headers
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Send one request frame without waiting for a reply
    pub async fn send(&mut self, payload: &[u8]) -> IpcResult<()> {
        let frame = encode_request(self.protocol_version, payload)?;
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Wait for the next response frame
    pub async fn recv(&mut self) -> IpcResult<Bytes> {
        let mut len = [0u8; RESPONSE_HEADER_LEN];
        match self.stream.read_exact(&mut len).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(IpcError::ConnectionClosed);
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len) as usize;
        Ok(read_payload(&mut self.stream, len).await?)
    }

    /// Send a request and wait for its reply
    pub async fn request(&mut self, payload: &[u8]) -> IpcResult<Bytes> {
        self.send(payload).await?;
        self.recv().await
    }

    /// Ask for the server version string
    pub async fn version(&mut self) -> IpcResult<String> {
        let reply = self.request(Command::Version.literal()).await?;
        String::from_utf8(reply.to_vec())
            .map_err(|e| IpcError::UnexpectedResponse(format!("version is not UTF-8: {e}")))
    }

    /// Allocate a new secondary channel and return its path
    pub async fn open_channel(&mut self) -> IpcResult<PathBuf> {
        let reply = self.request(Command::RabbitHole.literal()).await?;
        if reply.is_empty() {
            return Err(IpcError::UnexpectedResponse("empty channel path".into()));
        }

        Ok(PathBuf::from(OsStr::from_bytes(&reply)))
    }
}
