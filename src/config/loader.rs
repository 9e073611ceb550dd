//! TOML configuration loading, env-var overrides, and atomic saves.
//!
//! # Loading order
//! 1. Parse `<data_dir>/config.toml` (or the path in `CARAPACE_CONFIG`).
//! 2. Apply `CARAPACE_*` environment variable overrides.
//! 3. Fall back to [`AppConfig::default()`] if the file is missing.
//!
//! # Atomic save
//! Writes to `<path>.tmp` then renames to `<path>` to avoid partial
//! writes corrupting the config file.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use crate::error::ConfigError;

use super::schema::AppConfig;

/// Return the data directory: `$CARAPACE_DATA_DIR` or `./data`.
pub fn data_dir() -> PathBuf {
    env::var("CARAPACE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data"))
}

pub fn default_config_path(data_dir: &Path) -> PathBuf {
    data_dir.join("config.toml")
}

/// Load [`AppConfig`] from `path`, falling back to defaults if the file
/// does not exist, then applying environment variable overrides.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let mut config = match fs::read_to_string(path) {
        Ok(content) => toml::from_str::<AppConfig>(&content)
            .map_err(|e| ConfigError::Parse { path: path.display().to_string(), source: e })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
        Err(e) => return Err(ConfigError::Read { path: path.display().to_string(), source: e }),
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load config from `<data_dir>/config.toml` (or `CARAPACE_CONFIG`), never failing.
pub fn load_default_config(data_dir: &Path) -> AppConfig {
    let path = env::var("CARAPACE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path(data_dir));

    load_config(&path).unwrap_or_default()
}

/// Apply `CARAPACE_*` environment variable overrides to `config`.
///
/// Supported overrides:
/// - `CARAPACE_AGENT_MODEL`      → `agent.model`
/// - `CARAPACE_CLASSIFIER_MODEL` → `agent.classifier_model`
/// - `CARAPACE_LOG`              → `carapace.log_level`
/// - `CARAPACE_SERVER_HOST`      → `server.host`
/// - `CARAPACE_SERVER_PORT`      → `server.port`
/// - `CARAPACE_PROXY_PORT`       → `sandbox.proxy_port`
fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = env::var("CARAPACE_AGENT_MODEL") {
        config.agent.model = v;
    }
    if let Ok(v) = env::var("CARAPACE_CLASSIFIER_MODEL") {
        config.agent.classifier_model = v;
    }
    if let Ok(v) = env::var("CARAPACE_LOG") {
        config.carapace.log_level = v;
    }
    if let Ok(v) = env::var("CARAPACE_SERVER_HOST") {
        config.server.host = v;
    }
    if let Ok(v) = env::var("CARAPACE_SERVER_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            config.server.port = port;
        }
    }
    if let Ok(v) = env::var("CARAPACE_PROXY_PORT") {
        if let Ok(port) = v.parse::<u16>() {
            config.sandbox.proxy_port = port;
        }
    }
}

/// Atomically save `config` to `path`: write `<path>.tmp`, then rename.
pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &content)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn load_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[agent]
model = "anthropic:claude-sonnet-4.5"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.agent.model, "anthropic:claude-sonnet-4.5");
        assert_eq!(config.agent.max_iterations, 20);
        assert_eq!(config.sandbox.idle_timeout_minutes, 15);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut original = AppConfig::default();
        original.agent.model = "openai:gpt-4o".to_owned();
        original.sandbox.proxy_port = 4000;

        save_config(&path, &original).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_override_agent_model() {
        let key = "CARAPACE_AGENT_MODEL";
        unsafe { env::set_var(key, "openai:gpt-4-turbo") };
        let config = load_default_config(dir_for_test().path());
        unsafe { env::remove_var(key) };
        assert_eq!(config.agent.model, "openai:gpt-4-turbo");
    }

    fn dir_for_test() -> TempDir {
        TempDir::new().unwrap()
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "not valid toml {{{");
        assert!(load_config(&path).is_err());
    }
}
