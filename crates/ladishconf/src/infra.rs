//! Infrastructure configuration - things that cannot change at runtime.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem paths for daemon state and IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Base directory for studios and the recent list.
    /// Default: ~/.ladish
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,

    /// Unix socket the daemon listens on.
    /// Default: $XDG_RUNTIME_DIR/ladish.sock, falling back to /tmp/ladish-$USER.sock
    #[serde(default = "PathsConfig::default_socket_path")]
    pub socket_path: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".ladish"))
            .unwrap_or_else(|| PathBuf::from(".ladish"))
    }

    fn default_socket_path() -> PathBuf {
        if let Some(runtime) = directories::BaseDirs::new().and_then(|d| d.runtime_dir().map(|p| p.to_path_buf())) {
            return runtime.join("ladish.sock");
        }
        let user = std::env::var("USER").unwrap_or_else(|_| "default".to_string());
        PathBuf::from(format!("/tmp/ladish-{}.sock", user))
    }

    /// Directory holding saved studio documents.
    pub fn studios_dir(&self) -> PathBuf {
        self.state_dir.join("studios")
    }

    /// File holding the most-recently-used studio names.
    pub fn recent_studios_file(&self) -> PathBuf {
        self.state_dir.join("recent_studios")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
            socket_path: Self::default_socket_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter (trace, debug, info, warn, error, or a full EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// Complete infrastructure configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
