//! Bootstrap configuration - seeds runtime state, then runtime owns it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// App supervisor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Terminal emulator used for apps flagged `terminal`.
    /// Default: xterm
    #[serde(default = "SupervisorConfig::default_terminal")]
    pub terminal: String,

    /// How long a studio stop waits for apps before killing them.
    /// Default: 10000 (10s)
    #[serde(default = "SupervisorConfig::default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl SupervisorConfig {
    fn default_terminal() -> String {
        "xterm".to_string()
    }

    fn default_stop_timeout_ms() -> u64 {
        10_000
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            terminal: Self::default_terminal(),
            stop_timeout_ms: Self::default_stop_timeout_ms(),
        }
    }
}

/// JACK backend selection and the server parameters new studios start with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JackConfig {
    /// "loopback" (in-process model, no server) or "jack".
    /// Default: loopback
    #[serde(default = "JackConfig::default_backend")]
    pub backend: String,

    /// Client name used when talking to a real JACK server.
    #[serde(default = "JackConfig::default_client_name")]
    pub client_name: String,

    /// Engine/driver parameters stored into newly created studios.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl JackConfig {
    fn default_backend() -> String {
        "loopback".to_string()
    }

    fn default_client_name() -> String {
        "ladishd".to_string()
    }
}

impl Default for JackConfig {
    fn default() -> Self {
        Self {
            backend: Self::default_backend(),
            client_name: Self::default_client_name(),
            params: BTreeMap::new(),
        }
    }
}

/// Recent studios list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentConfig {
    /// Default: 10
    #[serde(default = "RecentConfig::default_max_items")]
    pub max_items: usize,
}

impl RecentConfig {
    fn default_max_items() -> usize {
        10
    }
}

impl Default for RecentConfig {
    fn default() -> Self {
        Self {
            max_items: Self::default_max_items(),
        }
    }
}

/// Complete bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    #[serde(default)]
    pub jack: JackConfig,

    #[serde(default)]
    pub recent: RecentConfig,
}
