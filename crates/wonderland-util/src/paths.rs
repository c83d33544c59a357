//! Default paths for wonderland components
//!
//! Provides centralized path defaults that all crates can use:
//! - Socket: `$WONDERLAND_SOCKET` or `/tmp/wonderland`
//! - Secondary channels: `/tmp/rabbithole-<id>`
//! - Config: `$XDG_CONFIG_HOME/wonderland/config.toml` or `~/.config/wonderland/config.toml`

use std::path::{Path, PathBuf};

use crate::ChannelId;

/// Environment variable for overriding the socket path
pub const WONDERLAND_SOCKET_ENV: &str = "WONDERLAND_SOCKET";

/// Well-known path of the primary listening socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/wonderland";

/// Directory secondary channels are created in
pub const DEFAULT_CHANNEL_DIR: &str = "/tmp/";

/// File name prefix of secondary channels; the channel id follows it
pub const DEFAULT_CHANNEL_PREFIX: &str = "rabbithole-";

/// Application subdirectory name
const APP_DIR: &str = "wonderland";

/// Get the default socket path.
///
/// Order of precedence:
/// 1. `$WONDERLAND_SOCKET` environment variable (if set)
/// 2. `/tmp/wonderland`
pub fn default_socket_path() -> PathBuf {
    if let Ok(path) = std::env::var(WONDERLAND_SOCKET_ENV) {
        return PathBuf::from(path);
    }

    socket_path_without_env()
}

/// Get the socket path without checking the WONDERLAND_SOCKET env var.
/// Used for default values in configs where the env var is checked separately.
pub fn socket_path_without_env() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

/// Get the default directory for secondary channels
pub fn default_channel_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CHANNEL_DIR)
}

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$XDG_CONFIG_HOME/wonderland/config.toml` (if XDG_CONFIG_HOME is set)
/// 2. `~/.config/wonderland/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    // Last resort
    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Path of a secondary channel: `{base_dir}{prefix}{id}`.
///
/// Plain concatenation: `base_dir` needs its own trailing `/` to act as a
/// directory.
pub fn channel_path(base_dir: &Path, prefix: &str, id: ChannelId) -> PathBuf {
    let mut path = base_dir.as_os_str().to_owned();
    path.push(prefix);
    path.push(id.to_string());
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_path_is_well_known() {
        assert_eq!(socket_path_without_env(), PathBuf::from("/tmp/wonderland"));
    }

    #[test]
    fn config_path_contains_wonderland() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("wonderland"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn channel_path_concatenates_dir_prefix_and_id() {
        let path = channel_path(
            &default_channel_dir(),
            DEFAULT_CHANNEL_PREFIX,
            ChannelId::new(3),
        );
        assert_eq!(path, PathBuf::from("/tmp/rabbithole-3"));
    }

    #[test]
    fn channel_path_without_trailing_slash_is_not_joined() {
        let path = channel_path(Path::new("/run/wonderland"), "hole-", ChannelId::new(0));
        assert_eq!(path, PathBuf::from("/run/wonderlandhole-0"));
    }
}
