//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]                     # API server location and per-call timeout
//! [auth]                       # token buffer and auth endpoint paths
//! [retry]                      # caller-directed retry backoff
//! [storage]                    # where tokens and the session snapshot live
//! [permissions.roles.<ROLE>]   # overrides merged into the built-in matrix
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged. Use the accessors to read a section
/// with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgoraConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionsConfig>,
}

impl AgoraConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AgoraConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, except permission roles which are
    /// merged per role.
    pub fn merge(&mut self, other: AgoraConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.auth.is_some() {
            self.auth = other.auth;
        }
        if other.retry.is_some() {
            self.retry = other.retry;
        }
        if other.storage.is_some() {
            self.storage = other.storage;
        }
        if let Some(other) = other.permissions {
            let permissions = self.permissions.get_or_insert_with(Default::default);
            permissions.roles.extend(other.roles);
        }
    }

    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    pub fn auth(&self) -> AuthConfig {
        self.auth.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn storage(&self) -> StorageConfig {
        self.storage.clone().unwrap_or_default()
    }

    /// Role overrides, empty when none are configured.
    pub fn roles(&self) -> BTreeMap<String, RoleConfig> {
        self.permissions
            .as_ref()
            .map(|p| p.roles.clone())
            .unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if let Some(server) = &self.server {
            if server.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "server.base_url".into(),
                    reason: "must not be empty".into(),
                });
            }
            if server.timeout_secs == 0 {
                return Err(ConfigError::Invalid {
                    field: "server.timeout_secs".into(),
                    reason: "must be at least 1".into(),
                });
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the portal API.
    pub base_url: String,
    /// Timeout for every HTTP call, refresh included.
    pub timeout_secs: u64,
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

/// Auth flow configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Seconds before `exp` at which a token counts as expiring.
    pub refresh_buffer_secs: u64,
    pub login_path: String,
    pub refresh_path: String,
    pub permissions_path: String,
    /// Path fragments that never carry or refresh a token.
    pub skip_auth_paths: Vec<String>,
}

impl AuthConfig {
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_secs: 300,
            login_path: "/api/user/auth/login".to_string(),
            refresh_path: "/api/user/auth/refresh".to_string(),
            permissions_path: "/api/user/auth/permissions".to_string(),
            skip_auth_paths: vec!["/auth/login".to_string(), "/auth/register".to_string()],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry
// ─────────────────────────────────────────────────────────────────────────────

/// Backoff for caller-directed retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8000,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// Token storage location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `tokens.json`. Defaults to the config directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_dir: Option<PathBuf>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

/// Permission matrix overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsConfig {
    pub roles: BTreeMap<String, RoleConfig>,
}

/// One role's grant as written in TOML.
///
/// ```toml
/// [permissions.roles.MODERATOR]
/// level = 60
/// batch_limit = 50
/// resources = { forum_post = ["read", "update", "delete"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleConfig {
    pub level: u32,
    /// Omitted means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_limit: Option<usize>,
    pub resources: BTreeMap<String, Vec<String>>,
}
