//! Request command - send one authenticated request and print the result.

use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use serde_json::Value;

use agora_client::{Error, with_retry};

use super::Context;
use crate::client;

/// HTTP method for the request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Arguments for the request command.
#[derive(Args, Debug)]
pub struct RequestArgs {
    /// HTTP method
    #[arg(value_enum)]
    pub method: HttpMethod,

    /// API path, e.g. /api/notices
    pub path: String,

    /// JSON request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// Retry transient failures with backoff from [retry]
    #[arg(long)]
    pub retry: bool,
}

/// Run the request command.
pub async fn run(args: RequestArgs, ctx: &Context) -> Result<()> {
    let body = args
        .data
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .context("--data is not valid JSON")?;

    let client = client::build(ctx)?;
    let method = reqwest::Method::from(args.method);
    let policy = if args.retry {
        client::retry_policy(&ctx.config().retry())
    } else {
        agora_client::RetryPolicy::none()
    };

    let label = format!("{} {}", method, args.path);
    let result = with_retry(&policy, &label, || {
        client.request::<Value, Value>(method.clone(), &args.path, body.as_ref())
    })
    .await;

    match result {
        Ok(value) => {
            if ctx.json_output {
                println!("{}", serde_json::to_string(&value)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            Ok(())
        }
        Err(err) => Err(describe(err)),
    }
}

/// Turn a client error into a message for the terminal.
fn describe(err: Error) -> anyhow::Error {
    match err {
        Error::Request(classified) => {
            let hint = if classified.triggers_reauth {
                "\nRun 'agora auth login' to log in again."
            } else if classified.retryable {
                "\nThis looks transient; try again or pass --retry."
            } else {
                ""
            };
            anyhow::anyhow!(
                "{} ({}): {}{}",
                classified.user_message(),
                classified.kind,
                classified.message,
                hint
            )
        }
        Error::ReauthRequired(reason) => anyhow::anyhow!(
            "Session expired ({}).\nRun 'agora auth login' to log in again.",
            reason
        ),
        other => anyhow::Error::new(other),
    }
}
