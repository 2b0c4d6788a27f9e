//! Configuration for the Agora portal client.
//!
//! Provides TOML-based configuration with:
//! - Server location and per-call timeout (`[server]`)
//! - Token buffer and auth endpoint paths (`[auth]`)
//! - Caller-directed retry backoff (`[retry]`)
//! - Token storage location (`[storage]`)
//! - Permission matrix overrides (`[permissions.roles.<ROLE>]`)
//!
//! Files are layered: the user config directory first, then a
//! project-local `agora.toml`, then environment overrides.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    CONFIG_DIR_ENV, ConfigSource, LoadedConfig, SERVER_URL_ENV, config_dir, config_path,
    load_config, load_config_file, load_config_with_options, save_config,
};
pub use error::{ConfigError, Result};
pub use types::*;
