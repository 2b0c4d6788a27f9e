//! CLI command handlers.

use std::path::PathBuf;

use agora_config::{AgoraConfig, LoadedConfig};

pub mod auth;
pub mod can;
pub mod config;
pub mod request;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Directory holding config, tokens and logs.
    pub config_dir: PathBuf,
    /// Server URL to connect to.
    pub server_url: String,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn new(
        loaded: LoadedConfig,
        config_dir: PathBuf,
        server_override: Option<String>,
        json_output: bool,
        verbose: bool,
    ) -> Self {
        let server_url = server_override.unwrap_or_else(|| loaded.config.server().base_url);
        Self {
            loaded,
            config_dir,
            server_url,
            json_output,
            verbose,
        }
    }

    pub fn config(&self) -> &AgoraConfig {
        &self.loaded.config
    }

    /// Directory holding `tokens.json`.
    pub fn token_dir(&self) -> PathBuf {
        self.config()
            .storage()
            .token_dir
            .unwrap_or_else(|| self.config_dir.clone())
    }
}
