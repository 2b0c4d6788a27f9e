//! Auth command - login, logout and local session status.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use console::{Style, style};

use super::Context;
use crate::client;

/// Arguments for the auth command.
#[derive(Args, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommand,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Log in with account and password
    Login {
        /// Account name (username, student id or email)
        #[arg(long)]
        account: String,

        /// Password (prompted when omitted)
        #[arg(long, env = "AGORA_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Show local authentication status
    Status,

    /// Clear the stored session and tokens
    Logout,

    /// Re-fetch roles and permissions for the current session
    Refresh,
}

/// Run the auth command.
pub async fn run(args: AuthArgs, ctx: &Context) -> Result<()> {
    match args.command {
        AuthCommand::Login { account, password } => cmd_login(&account, password, ctx).await,
        AuthCommand::Status => cmd_status(ctx).await,
        AuthCommand::Logout => cmd_logout(ctx).await,
        AuthCommand::Refresh => cmd_refresh(ctx).await,
    }
}

async fn cmd_login(account: &str, password: Option<String>, ctx: &Context) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => rpassword::prompt_password(format!("Password for {}: ", account))?,
    };
    if password.is_empty() {
        bail!("No password provided, aborting.");
    }

    let client = client::build(ctx)?;
    let session = client.auth().login(account, &password).await?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    let name = session
        .user
        .display_name
        .as_deref()
        .or(session.user.username.as_deref())
        .unwrap_or(account);
    println!(
        "{} Logged in as {} ({})",
        Style::new().green().apply_to("✓"),
        style(name).bold(),
        session.role
    );
    if let Some(info) = client.tokens().info() {
        println!("  Token expires in: {}", info.expires_in_display());
    }
    Ok(())
}

async fn cmd_status(ctx: &Context) -> Result<()> {
    let client = client::build(ctx)?;
    let status = client.status();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let dim = Style::new().dim();
    println!();
    println!("{}", style("Authentication Status").bold());
    println!("{}", dim.apply_to("─".repeat(40)));
    println!("  {} {}", dim.apply_to("Server:"), ctx.server_url);

    if !status.logged_in {
        println!(
            "  {} {}",
            dim.apply_to("Status:"),
            Style::new().red().apply_to("● not logged in")
        );
        println!();
        println!(
            "  {}",
            dim.apply_to("Log in with: agora auth login --account <account>")
        );
        println!();
        return Ok(());
    }

    println!(
        "  {} {}",
        dim.apply_to("Status:"),
        Style::new().green().apply_to("● logged in")
    );
    if let Some(user) = &status.user {
        let name = user.username.as_deref().unwrap_or("-");
        println!("  {} {} (id {})", dim.apply_to("User:"), name, user.id);
    }
    if let Some(role) = &status.role {
        println!("  {} {}", dim.apply_to("Role:"), role);
    }
    if status.all_roles.len() > 1 {
        println!("  {} {}", dim.apply_to("Roles:"), status.all_roles.join(", "));
    }
    if let Some(token) = &status.token {
        let expiry = if token.is_expiring {
            format!("{} (refreshes on next request)", token.expires_in_display())
        } else {
            token.expires_in_display()
        };
        println!("  {} {}", dim.apply_to("Token:"), expiry);
    }
    println!();
    Ok(())
}

async fn cmd_logout(ctx: &Context) -> Result<()> {
    let client = client::build(ctx)?;
    let was_logged_in = client.is_logged_in();
    client.auth().logout().await?;

    if ctx.json_output {
        println!("{}", serde_json::json!({ "logged_out": was_logged_in }));
    } else if was_logged_in {
        println!("Logged out. Stored tokens removed.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

async fn cmd_refresh(ctx: &Context) -> Result<()> {
    let client = client::build(ctx)?;
    if !client.is_logged_in() {
        bail!("Not logged in. Run 'agora auth login' first.");
    }

    match client.auth().refresh_permissions().await? {
        Some(session) if ctx.json_output => {
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        Some(session) => {
            println!("Role: {}", session.role);
            println!("Roles: {}", session.all_roles.join(", "));
            if !session.permissions.is_empty() {
                println!("Permissions: {}", session.permissions.join(", "));
            }
        }
        None => println!("No cached session to update."),
    }
    Ok(())
}
