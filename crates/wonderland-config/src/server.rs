//! Validated server configuration

use crate::schema::{RawConfig, RawServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use wonderland_util::{
    default_channel_dir, socket_path_without_env, DEFAULT_CHANNEL_PREFIX, SERVER_VERSION,
};

/// Default upper bound on a request payload (64 KiB)
pub const DEFAULT_MAX_PAYLOAD_BYTES: u32 = 64 * 1024;

/// Validated configuration ready for use by the IPC server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub channel_dir: PathBuf,
    pub channel_prefix: String,
    pub max_payload_bytes: u32,
    pub server_version: String,
    /// None blocks indefinitely on a stalled peer
    pub read_timeout: Option<Duration>,
}

impl ServerConfig {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self::from_raw_server(raw.server)
    }

    fn from_raw_server(raw: RawServerConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            channel_dir: raw.channel_dir.unwrap_or_else(default_channel_dir),
            channel_prefix: raw
                .channel_prefix
                .unwrap_or_else(|| DEFAULT_CHANNEL_PREFIX.to_string()),
            max_payload_bytes: raw.max_payload_bytes.unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES),
            server_version: raw
                .server_version
                .unwrap_or_else(|| SERVER_VERSION.to_string()),
            read_timeout: raw.read_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_channel_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.channel_dir = dir.into();
        self
    }

    pub fn with_max_payload_bytes(mut self, max: u32) -> Self {
        self.max_payload_bytes = max;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_raw_server(RawServerConfig::default())
    }
}
