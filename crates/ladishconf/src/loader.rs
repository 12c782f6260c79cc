//! Config file discovery, layered loading, and environment variable overlay.

use crate::{ConfigError, LadishConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Where the effective configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Files merged, lowest precedence first
    pub files: Vec<PathBuf>,
    /// `LADISH_*` variables that won over the files
    pub env_overrides: Vec<String>,
}

/// Config files found in the system, user and working directories.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Like [`discover_config_files`], with an existing `cli_path` replacing `./ladish.toml`.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/ladish/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("ladish/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("ladish.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and layer its keys over `config`.
pub fn apply_file(config: &mut LadishConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    apply_toml(config, &contents, path)
}

/// Parse a TOML document on top of compiled defaults.
pub fn parse_toml(contents: &str, path: &Path) -> Result<LadishConfig, ConfigError> {
    let mut config = LadishConfig::default();
    apply_toml(&mut config, contents, path)?;
    Ok(config)
}

/// Layer the keys present in `contents` over `config`. Absent keys keep their current value.
fn apply_toml(config: &mut LadishConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let bad_type = |key: &str, expected: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("{} must be {}", key, expected),
    };

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = paths.get("state_dir") {
            let v = v.as_str().ok_or_else(|| bad_type("paths.state_dir", "a string"))?;
            config.infra.paths.state_dir = expand_path(v);
        }
        if let Some(v) = paths.get("socket_path") {
            let v = v.as_str().ok_or_else(|| bad_type("paths.socket_path", "a string"))?;
            config.infra.paths.socket_path = expand_path(v);
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    let Some(bootstrap) = table.get("bootstrap").and_then(|v| v.as_table()) else {
        return Ok(());
    };

    if let Some(supervisor) = bootstrap.get("supervisor").and_then(|v| v.as_table()) {
        if let Some(v) = supervisor.get("terminal").and_then(|v| v.as_str()) {
            config.bootstrap.supervisor.terminal = v.to_string();
        }
        if let Some(v) = supervisor.get("stop_timeout_ms") {
            let v = v
                .as_integer()
                .filter(|n| *n >= 0)
                .ok_or_else(|| bad_type("bootstrap.supervisor.stop_timeout_ms", "a non-negative integer"))?;
            config.bootstrap.supervisor.stop_timeout_ms = v as u64;
        }
    }

    if let Some(jack) = bootstrap.get("jack").and_then(|v| v.as_table()) {
        if let Some(v) = jack.get("backend").and_then(|v| v.as_str()) {
            config.bootstrap.jack.backend = v.to_string();
        }
        if let Some(v) = jack.get("client_name").and_then(|v| v.as_str()) {
            config.bootstrap.jack.client_name = v.to_string();
        }
        if let Some(params) = jack.get("params").and_then(|v| v.as_table()) {
            for (key, value) in params {
                let rendered = match value {
                    toml::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                config.bootstrap.jack.params.insert(key.clone(), rendered);
            }
        }
    }

    if let Some(recent) = bootstrap.get("recent").and_then(|v| v.as_table()) {
        if let Some(v) = recent.get("max_items") {
            let v = v
                .as_integer()
                .filter(|n| *n > 0)
                .ok_or_else(|| bad_type("bootstrap.recent.max_items", "a positive integer"))?;
            config.bootstrap.recent.max_items = v as usize;
        }
    }

    Ok(())
}

/// Apply `LADISH_*` overrides on top of the merged files.
pub fn apply_env_overrides(config: &mut LadishConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |key| env::var(key).ok());
}

fn apply_overrides_from(
    config: &mut LadishConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(v) = lookup("LADISH_STATE_DIR") {
        config.infra.paths.state_dir = expand_path(&v);
        sources.env_overrides.push("LADISH_STATE_DIR".to_string());
    }
    if let Some(v) = lookup("LADISH_SOCKET") {
        config.infra.paths.socket_path = expand_path(&v);
        sources.env_overrides.push("LADISH_SOCKET".to_string());
    }

    if let Some(v) = lookup("LADISH_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("LADISH_LOG_LEVEL".to_string());
    }
    // RUST_LOG wins over everything
    if let Some(v) = lookup("RUST_LOG") {
        config.infra.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }

    if let Some(v) = lookup("LADISH_TERMINAL") {
        config.bootstrap.supervisor.terminal = v;
        sources.env_overrides.push("LADISH_TERMINAL".to_string());
    }
    if let Some(v) = lookup("LADISH_JACK_BACKEND") {
        config.bootstrap.jack.backend = v;
        sources.env_overrides.push("LADISH_JACK_BACKEND".to_string());
    }
}

/// Expand a leading `~/` or `$VAR/`.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        match directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
            Some(home) => home.join(stripped),
            None => PathBuf::from(path),
        }
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR/rest/of/path
        if let Some(slash_pos) = stripped.find('/') {
            let var_name = &stripped[..slash_pos];
            match env::var(var_name) {
                Ok(var_value) => PathBuf::from(var_value).join(&stripped[slash_pos + 1..]),
                Err(_) => PathBuf::from(path),
            }
        } else {
            env::var(stripped)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(path))
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/studios");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("studios"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/srv/ladish"), PathBuf::from("/srv/ladish"));
    }

    #[test]
    fn test_expand_path_unknown_var_is_left_alone() {
        let expanded = expand_path("$LADISH_SURELY_UNSET_VAR/x");
        assert_eq!(expanded, PathBuf::from("$LADISH_SURELY_UNSET_VAR/x"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[paths]
state_dir = "/custom/state"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(config.bootstrap.recent.max_items, 10);
        assert_eq!(config.bootstrap.jack.backend, "loopback");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[paths]
state_dir = "/data/ladish"
socket_path = "/run/ladish.sock"

[telemetry]
log_level = "debug"

[bootstrap.supervisor]
terminal = "urxvt"
stop_timeout_ms = 2500

[bootstrap.jack]
backend = "jack"
client_name = "ladish-test"

[bootstrap.jack.params]
driver = "alsa"
rate = 48000

[bootstrap.recent]
max_items = 4
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/data/ladish"));
        assert_eq!(config.infra.paths.socket_path, PathBuf::from("/run/ladish.sock"));
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert_eq!(config.bootstrap.supervisor.terminal, "urxvt");
        assert_eq!(config.bootstrap.supervisor.stop_timeout_ms, 2500);
        assert_eq!(config.bootstrap.jack.backend, "jack");
        assert_eq!(config.bootstrap.jack.client_name, "ladish-test");
        assert_eq!(config.bootstrap.jack.params.get("driver"), Some(&"alsa".to_string()));
        assert_eq!(config.bootstrap.jack.params.get("rate"), Some(&"48000".to_string()));
        assert_eq!(config.bootstrap.recent.max_items, 4);
    }

    #[test]
    fn test_later_layer_only_overrides_present_keys() {
        let mut config = parse_toml(
            "[bootstrap.supervisor]\nterminal = \"urxvt\"\nstop_timeout_ms = 500\n",
            Path::new("user.toml"),
        )
        .unwrap();
        apply_toml(
            &mut config,
            "[bootstrap.supervisor]\nstop_timeout_ms = 900\n",
            Path::new("local.toml"),
        )
        .unwrap();

        assert_eq!(config.bootstrap.supervisor.terminal, "urxvt");
        assert_eq!(config.bootstrap.supervisor.stop_timeout_ms, 900);
    }

    #[test]
    fn test_bad_value_type_is_parse_error() {
        let err = parse_toml("[bootstrap.recent]\nmax_items = \"lots\"\n", Path::new("bad.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("max_items"));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = parse_toml("[paths\nstate_dir = 1", Path::new("broken.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_env_overrides_are_recorded() {
        let env: HashMap<&str, &str> = [
            ("LADISH_STATE_DIR", "/tmp/ladish-env"),
            ("LADISH_LOG_LEVEL", "warn"),
            ("RUST_LOG", "ladishd=trace"),
            ("LADISH_JACK_BACKEND", "jack"),
        ]
        .into_iter()
        .collect();

        let mut config = LadishConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.infra.paths.state_dir, PathBuf::from("/tmp/ladish-env"));
        assert_eq!(config.infra.telemetry.log_level, "ladishd=trace");
        assert_eq!(config.bootstrap.jack.backend, "jack");
        assert_eq!(
            sources.env_overrides,
            vec!["LADISH_STATE_DIR", "LADISH_LOG_LEVEL", "RUST_LOG", "LADISH_JACK_BACKEND"]
        );
    }
}
