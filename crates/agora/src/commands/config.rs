//! Config command - configuration management.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde_json::json;

use agora_config::{AgoraConfig, AuthConfig, RetryConfig, ServerConfig};

use super::Context;

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show resolved configuration
    Show,

    /// Show which config files are loaded and their precedence
    Which,

    /// Initialize a config file with defaults
    Init {
        /// Create project-local config (./agora.toml) instead of user config
        #[arg(long)]
        local: bool,
    },

    /// Show configuration file path
    Path,
}

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => cmd_show(ctx).await,
        ConfigCommand::Which => cmd_which(ctx).await,
        ConfigCommand::Init { local } => cmd_init(local, ctx).await,
        ConfigCommand::Path => cmd_path(ctx).await,
    }
}

async fn cmd_show(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;
    let config = ctx.config();

    if ctx.json_output {
        let output = json!({
            "server_url": ctx.server_url,
            "token_dir": ctx.token_dir(),
            "sources": loaded.loaded_from(),
            "env_overrides": loaded.env_overrides,
            "warnings": loaded.warnings,
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("# Agora Configuration\n");

    let sources = loaded.loaded_from();
    if sources.is_empty() {
        println!("No config files loaded (using defaults)\n");
    } else {
        println!("Config files:");
        for source in &sources {
            println!("  {}", source.display());
        }
        println!();
    }

    let server = config.server();
    println!("Server:");
    println!("  url: {}", ctx.server_url);
    println!("  timeout: {}s", server.timeout_secs);
    println!();

    let auth = config.auth();
    println!("Auth:");
    println!("  refresh buffer: {}s", auth.refresh_buffer_secs);
    println!("  login: {}", auth.login_path);
    println!("  refresh: {}", auth.refresh_path);
    println!("  permissions: {}", auth.permissions_path);
    if !auth.skip_auth_paths.is_empty() {
        println!("  unauthenticated: {}", auth.skip_auth_paths.join(", "));
    }
    println!();

    let retry = config.retry();
    println!("Retry:");
    println!(
        "  {} attempts, backoff {}ms..{}ms",
        retry.max_retries, retry.initial_backoff_ms, retry.max_backoff_ms
    );
    println!();

    println!("Tokens: {}", ctx.token_dir().join("tokens.json").display());
    println!();

    let roles = config.roles();
    if !roles.is_empty() {
        println!("Role overrides:");
        for (name, role) in &roles {
            println!("  {:<12} level {}", name, role.level);
        }
        println!();
    }

    if !loaded.env_overrides.is_empty() {
        println!("Environment overrides: {}", loaded.env_overrides.join(", "));
        println!();
    }

    if !loaded.warnings.is_empty() {
        println!("Warnings:");
        for w in &loaded.warnings {
            println!("  ⚠ {}", w);
        }
        println!();
    }

    if ctx.verbose {
        println!("---\nRaw config:\n");
        if let Ok(toml_str) = config.to_toml() {
            println!("{}", toml_str);
        }
    }

    Ok(())
}

async fn cmd_which(ctx: &Context) -> Result<()> {
    let loaded = &ctx.loaded;

    if ctx.json_output {
        let sources: Vec<_> = loaded
            .sources
            .iter()
            .map(|s| json!({ "path": s.path, "loaded": s.loaded }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&sources)?);
        return Ok(());
    }

    println!("Config file search order (later overrides earlier):\n");
    for source in &loaded.sources {
        let status = if source.loaded {
            "✓ loaded"
        } else {
            "· not found"
        };
        println!("  {} {}", status, source.path.display());
    }

    println!();
    let loaded_count = loaded.loaded_from().len();
    if loaded_count == 0 {
        println!("No config files found. Run 'agora config init' to create one.");
    } else {
        println!("{} config file(s) loaded.", loaded_count);
    }

    Ok(())
}

async fn cmd_init(local: bool, ctx: &Context) -> Result<()> {
    let path = init_path(local, ctx);
    if path.exists() {
        println!("Config file already exists: {}", path.display());
        return Ok(());
    }

    agora_config::save_config(&default_config(), &path)?;
    println!("Created {}", path.display());
    Ok(())
}

async fn cmd_path(ctx: &Context) -> Result<()> {
    println!("{}", init_path(false, ctx).display());
    Ok(())
}

fn init_path(local: bool, ctx: &Context) -> PathBuf {
    if local {
        PathBuf::from("agora.toml")
    } else {
        ctx.config_dir.join("config.toml")
    }
}

/// Sections written by `config init`, filled with defaults.
fn default_config() -> AgoraConfig {
    AgoraConfig {
        server: Some(ServerConfig::default()),
        auth: Some(AuthConfig::default()),
        retry: Some(RetryConfig::default()),
        storage: None,
        permissions: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let config = default_config();
        let text = config.to_toml().unwrap();
        assert!(text.contains("[server]"));
        assert!(text.contains("[auth]"));
        assert_eq!(AgoraConfig::from_toml(&text).unwrap(), config);
    }
}
