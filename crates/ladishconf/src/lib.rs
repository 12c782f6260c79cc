//! Configuration loading for the ladish session daemon.
//!
//! Split the same way as every other layered config we ship:
//!
//! - **Infrastructure** (`InfraConfig`): paths and logging. Fixed once the daemon runs.
//! - **Bootstrap** (`BootstrapConfig`): supervisor, JACK backend and recent-list
//!   settings that seed runtime state.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, key by key):
//! 1. `/etc/ladish/config.toml` (system)
//! 2. `~/.config/ladish/config.toml` (user)
//! 3. `./ladish.toml` or the `--config` path (local override)
//! 4. Environment variables (`LADISH_*`, `RUST_LOG`)
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.ladish"
//! socket_path = "$XDG_RUNTIME_DIR/ladish.sock"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [bootstrap.supervisor]
//! terminal = "xterm"
//! stop_timeout_ms = 10000
//!
//! [bootstrap.jack]
//! backend = "loopback"
//!
//! [bootstrap.recent]
//! max_items = 10
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, JackConfig, RecentConfig, SupervisorConfig};
pub use infra::{InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete ladish configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LadishConfig {
    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl LadishConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an optional CLI override replacing `./ladish.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = LadishConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string that `load` can read back.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# ladish configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!(
            "state_dir = {}\n",
            quote(&self.infra.paths.state_dir.display().to_string())
        ));
        output.push_str(&format!(
            "socket_path = {}\n",
            quote(&self.infra.paths.socket_path.display().to_string())
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "log_level = {}\n",
            quote(&self.infra.telemetry.log_level)
        ));

        output.push_str("\n[bootstrap.supervisor]\n");
        output.push_str(&format!(
            "terminal = {}\n",
            quote(&self.bootstrap.supervisor.terminal)
        ));
        output.push_str(&format!(
            "stop_timeout_ms = {}\n",
            self.bootstrap.supervisor.stop_timeout_ms
        ));

        output.push_str("\n[bootstrap.jack]\n");
        output.push_str(&format!("backend = {}\n", quote(&self.bootstrap.jack.backend)));
        output.push_str(&format!(
            "client_name = {}\n",
            quote(&self.bootstrap.jack.client_name)
        ));

        if !self.bootstrap.jack.params.is_empty() {
            output.push_str("\n[bootstrap.jack.params]\n");
            for (key, value) in &self.bootstrap.jack.params {
                output.push_str(&format!("{} = {}\n", key, quote(value)));
            }
        }

        output.push_str("\n[bootstrap.recent]\n");
        output.push_str(&format!("max_items = {}\n", self.bootstrap.recent.max_items));

        output
    }
}

fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}
