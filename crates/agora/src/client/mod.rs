//! Composition root: builds the portal client from resolved configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use agora_client::{AgoraClient, FileStorage, PermissionMatrix, RetryPolicy, RoleGrant};
use agora_config::{RetryConfig, RoleConfig};

use crate::commands::Context;

/// Build a client backed by the token file in the configured directory.
pub fn build(ctx: &Context) -> Result<AgoraClient> {
    let config = ctx.config();
    let server = config.server();
    let auth = config.auth();

    let storage = Arc::new(FileStorage::new(&ctx.token_dir()));
    tracing::debug!(
        server = %ctx.server_url,
        tokens = %storage.path().display(),
        "Building client"
    );

    AgoraClient::builder()
        .base_url(&ctx.server_url)
        .timeout(server.timeout())
        .refresh_buffer(auth.refresh_buffer())
        .login_path(auth.login_path)
        .refresh_path(auth.refresh_path)
        .permissions_path(auth.permissions_path)
        .skip_auth_paths(auth.skip_auth_paths)
        .storage(storage)
        .permission_matrix(permission_matrix(&config.roles()))
        .build()
        .with_context(|| format!("Failed to create client for {}", ctx.server_url))
}

/// Built-in matrix with configured role overrides merged in.
pub fn permission_matrix(roles: &BTreeMap<String, RoleConfig>) -> PermissionMatrix {
    let overrides = roles
        .iter()
        .fold(PermissionMatrix::empty(), |matrix, (name, role)| {
            let grant = role.resources.iter().fold(
                RoleGrant::new(role.level, role.batch_limit),
                |grant, (resource, actions)| {
                    let actions: Vec<&str> = actions.iter().map(String::as_str).collect();
                    grant.allow(resource, &actions)
                },
            );
            matrix.with_role(name.clone(), grant)
        });
    PermissionMatrix::default().merge(overrides)
}

pub fn retry_policy(retry: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(retry.max_retries, retry.initial_backoff(), retry.max_backoff())
}
