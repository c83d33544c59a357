//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Server settings
    #[serde(default)]
    pub server: RawServerConfig,
}

/// Server-level settings. Every field is optional and falls back to a default.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServerConfig {
    /// Primary socket path (default: /tmp/wonderland)
    pub socket_path: Option<PathBuf>,

    /// Directory secondary channels are created in (default: /tmp/)
    pub channel_dir: Option<PathBuf>,

    /// File name prefix of secondary channels (default: rabbithole-)
    pub channel_prefix: Option<String>,

    /// Upper bound on a request payload, in bytes
    pub max_payload_bytes: Option<u32>,

    /// Version string reported to `VERSION` requests
    pub server_version: Option<String>,

    /// Read timeout applied to header and payload reads. Absent means no timeout.
    pub read_timeout_secs: Option<u64>,
}
