//! Command dispatch

use bytes::Bytes;
use std::os::unix::ffi::OsStrExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::ChannelRegistry;

/// Commands understood by the server.
///
/// Matching is by prefix: anything after the literal is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Allocate a new secondary channel and reply with its path
    RabbitHole,
    /// Reply with the server version string
    Version,
}

impl Command {
    /// Checked in this order; first match wins
    const ALL: [Command; 2] = [Command::RabbitHole, Command::Version];

    pub fn literal(self) -> &'static [u8] {
        match self {
            Command::RabbitHole => b"RABBITHOLE",
            Command::Version => b"VERSION",
        }
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|command| payload.starts_with(command.literal()))
    }
}

/// Turns request payloads into optional response payloads
#[derive(Debug, Clone)]
pub struct Dispatcher {
    channels: Arc<ChannelRegistry>,
    server_version: String,
}

impl Dispatcher {
    pub fn new(channels: Arc<ChannelRegistry>, server_version: impl Into<String>) -> Self {
        Self {
            channels,
            server_version: server_version.into(),
        }
    }

    /// Handle one request payload. `None` means nothing is sent back.
    pub fn dispatch(&self, payload: &[u8]) -> Option<Bytes> {
        let Some(command) = Command::parse(payload) else {
            debug!(payload_len = payload.len(), "Unrecognized command, not replying");
            return None;
        };

        match command {
            Command::RabbitHole => {
                let channel = self.channels.create_channel();
                info!(
                    channel_id = %channel.id(),
                    path = %channel.path().display(),
                    "Rabbit hole allocated"
                );
                Some(Bytes::copy_from_slice(channel.path().as_os_str().as_bytes()))
            }
            Command::Version => Some(Bytes::from(self.server_version.clone())),
        }
    }
}
