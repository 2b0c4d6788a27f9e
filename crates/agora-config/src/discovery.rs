//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `<config dir>/config.toml` (user config)
//! 2. `./agora.toml` (project-local)
//! 3. Environment (`AGORA_SERVER_URL`)
//! 4. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{AgoraConfig, ConfigError, Result, ServerConfig};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "agora.toml";

/// Default config filename within the config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "agora";

/// Environment variable to override the config directory.
pub const CONFIG_DIR_ENV: &str = "AGORA_CONFIG_DIR";

/// Environment variable to override `server.base_url`.
pub const SERVER_URL_ENV: &str = "AGORA_SERVER_URL";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Path to the config file.
    pub path: PathBuf,
    /// Whether the file was found and loaded.
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: AgoraConfig,
    /// Sources that were checked, in order of precedence (lowest first).
    pub sources: Vec<ConfigSource>,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<String>,
    /// Warnings generated during loading (e.g. a malformed layer).
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Get paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Load configuration by discovering and merging all config layers.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Load configuration with explicit control over the user config directory.
///
/// `config_dir` overrides both `AGORA_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = AgoraConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    // 1. User config: explicit override, then env var, then platform default
    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    // 2. Project-local config
    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    // 3. Environment
    let env_overrides = apply_env(&mut config, |key| std::env::var(key).ok());

    Ok(LoadedConfig {
        config,
        sources,
        env_overrides,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<AgoraConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    AgoraConfig::from_toml(&contents)
}

/// Save configuration to a file.
///
/// Creates parent directories if they don't exist.
pub fn save_config(config: &AgoraConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteFile {
            path: parent.display().to_string(),
            source: e,
        })?;
    }

    let contents = config.to_toml()?;
    std::fs::write(path, contents).map_err(|e| ConfigError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(())
}

/// Get the user config file path.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// Get the config directory for agora.
///
/// Checks `AGORA_CONFIG_DIR` first, then falls back to the platform default
/// (`~/.config/agora` on Linux, `~/Library/Application Support/agora` on macOS).
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Apply environment overrides; returns the variables that took effect.
fn apply_env(config: &mut AgoraConfig, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut applied = Vec::new();
    if let Some(url) = lookup(SERVER_URL_ENV).filter(|u| !u.trim().is_empty()) {
        config
            .server
            .get_or_insert_with(ServerConfig::default)
            .base_url = url;
        applied.push(SERVER_URL_ENV.to_string());
    }
    applied
}

/// Try to load a config file and merge it into the existing config.
///
/// A malformed layer is skipped with a warning rather than failing the load.
fn load_layer(config: &mut AgoraConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
