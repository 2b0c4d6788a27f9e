//! Auth API: login, logout and permission refresh.

use crate::classify::ClassifiedError;
use crate::client::AgoraClient;
use crate::error::{Error, Result};
use crate::normalize;
use crate::session::Session;
use crate::types::LoginRequest;

/// Auth API client.
///
/// Note: login is skip-listed and never carries an Authorization header.
pub struct AuthApi {
    client: AgoraClient,
}

impl AuthApi {
    pub(crate) fn new(client: AgoraClient) -> Self {
        Self { client }
    }

    /// Log in and persist the resulting tokens and session.
    pub async fn login(&self, account: &str, password: &str) -> Result<Session> {
        let inner = self.client.inner();
        let request = LoginRequest {
            account: account.to_string(),
            password: password.to_string(),
        };
        let body: serde_json::Value = self.client.post(&inner.paths.login, &request).await?;

        let outcome = normalize::login_outcome(&body).map_err(|e: ClassifiedError| {
            tracing::warn!(kind = %e.kind, error = %e.message, "Unusable login response");
            Error::Request(e)
        })?;

        inner.tokens.set(&outcome.tokens)?;
        inner.sessions.set(outcome.session.clone())?;

        tracing::info!(
            user_id = %outcome.session.user.id,
            role = %outcome.session.role,
            "Logged in"
        );
        Ok(outcome.session)
    }

    /// Drop the local session and tokens. The server is not contacted.
    pub async fn logout(&self) -> Result<()> {
        let inner = self.client.inner();
        let had_session = inner.sessions.clear();
        inner.tokens.clear()?;
        tracing::info!(had_session, "Logged out");
        Ok(())
    }

    /// Re-fetch role and permission data into the current session.
    ///
    /// Returns `None` when nobody is logged in locally.
    pub async fn refresh_permissions(&self) -> Result<Option<Session>> {
        let inner = self.client.inner();
        let body: serde_json::Value = self.client.get(&inner.paths.permissions).await?;
        let snapshot = normalize::permission_snapshot(normalize::unwrap_envelope(&body));
        let updated = inner.sessions.update_permissions(snapshot)?;
        if let Some(session) = &updated {
            tracing::info!(
                role = %session.role,
                roles = session.all_roles.len(),
                permissions = session.permissions.len(),
                "Permissions refreshed"
            );
        }
        Ok(updated)
    }
}
