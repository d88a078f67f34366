use directories::BaseDirs;
use std::{path::PathBuf, time::Duration};

use crate::types::BackendKind;

pub const DEBOUNCE_MS: u64 = 50;
pub const ICON_SIZE: u32 = 64;
pub const SOCKET_NAME: &str = "spacesync.sock";
pub const NOTIFICATION_NAME: &str = "workspace_change";
pub const INSTALL_DIRS: [&str; 2] = ["/opt/homebrew/bin", "/usr/local/bin"];
pub const COMMAND_ATTEMPTS: u32 = 2;
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_FETCHES_IN_FLIGHT: usize = 2;

/// Runtime settings for the engine and its listener.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub debounce: Duration,
    pub yabai_path: Option<PathBuf>,
    pub aerospace_path: Option<PathBuf>,
    pub socket_path: PathBuf,
    pub notification_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEBOUNCE_MS),
            yabai_path: None,
            aerospace_path: None,
            socket_path: default_socket_path(),
            notification_name: NOTIFICATION_NAME.to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `SPACESYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = lookup("SPACESYNC_DEBOUNCE_MS") {
            match ms.trim().parse::<u64>() {
                Ok(ms) => config.debounce = Duration::from_millis(ms),
                Err(_) => tracing::warn!("ignoring invalid SPACESYNC_DEBOUNCE_MS={ms}"),
            }
        }
        if let Some(path) = lookup("SPACESYNC_YABAI").filter(|v| !v.is_empty()) {
            config.yabai_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SPACESYNC_AEROSPACE").filter(|v| !v.is_empty()) {
            config.aerospace_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("SPACESYNC_SOCKET").filter(|v| !v.is_empty()) {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(name) = lookup("SPACESYNC_NOTIFICATION").filter(|v| !v.is_empty()) {
            config.notification_name = name;
        }
        config
    }

    pub fn binary_override(&self, kind: BackendKind) -> Option<&PathBuf> {
        match kind {
            BackendKind::Yabai => self.yabai_path.as_ref(),
            BackendKind::Aerospace => self.aerospace_path.as_ref(),
        }
    }
}

fn default_socket_path() -> PathBuf {
    // Per-user directories keep sockets of different users apart.
    match BaseDirs::new() {
        Some(dirs) => dirs
            .runtime_dir()
            .unwrap_or_else(|| dirs.cache_dir())
            .join("spacesync")
            .join(SOCKET_NAME),
        None => std::env::temp_dir().join(SOCKET_NAME),
    }
}
