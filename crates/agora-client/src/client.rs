//! Main client implementation: the authenticated request pipeline.
//!
//! Every verb goes through the same three steps:
//!
//! 1. **Pre-send.** Paths on the skip list (login, registration) bypass
//!    token logic. Otherwise, if a token exists and is expiring, the
//!    request suspends on [`RefreshCoordinator::refresh`]. A rejected
//!    refresh aborts the request with [`Error::ReauthRequired`] before it
//!    reaches the network.
//! 2. **Send.** Exactly one network call, with `Authorization: Bearer`
//!    when a token is present. The pipeline never retries.
//! 3. **Post-receive.** Failures are classified once. A 2xx body that
//!    declares `success: false` becomes a [`BusinessError`].
//!
//! Authentication and authorization failures tear the session down: the
//! session and tokens are cleared and one [`AuthEvent::ForcedLogout`] is
//! published. A 401 does so on every path, skip-listed ones included.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::api::AuthApi;
use crate::classify::{self, BusinessError, ClassifiedError, ErrorKind, Failure};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::events::{AuthEvent, EventBus};
use crate::normalize;
use crate::permissions::{PermissionEvaluator, PermissionMatrix};
use crate::refresh::{HttpRefreshTransport, RefreshCoordinator, RefreshTransport};
use crate::session::{Session, SessionStore};
use crate::storage::{MemoryStorage, TokenStorage};
use crate::token_store::{DEFAULT_REFRESH_BUFFER, TokenStore};
use crate::types::AuthStatus;

/// Default timeout for every HTTP call, refresh included.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub const DEFAULT_LOGIN_PATH: &str = "/api/user/auth/login";
pub const DEFAULT_REFRESH_PATH: &str = "/api/user/auth/refresh";
pub const DEFAULT_PERMISSIONS_PATH: &str = "/api/user/auth/permissions";

/// Path fragments that never carry or refresh a token.
pub const DEFAULT_SKIP_AUTH_PATHS: &[&str] = &["/auth/login", "/auth/register"];

/// Agora API client.
///
/// Cheap to clone; clones share tokens, session and the refresh lock.
///
/// # Example
///
/// ```no_run
/// use agora_client::AgoraClient;
///
/// # async fn example() -> agora_client::Result<()> {
/// let client = AgoraClient::builder()
///     .base_url("http://localhost:8080")
///     .build()?;
///
/// client.auth().login("alice", "secret").await?;
/// let notices: serde_json::Value = client.get("/api/notices").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AgoraClient {
    inner: Arc<ClientInner>,
}

/// Inner client state (shared across clones).
pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) base_url: Url,
    pub(crate) timeout: Duration,
    pub(crate) tokens: Arc<TokenStore>,
    pub(crate) sessions: SessionStore,
    pub(crate) refresher: RefreshCoordinator,
    pub(crate) events: EventBus,
    pub(crate) matrix: Arc<PermissionMatrix>,
    pub(crate) paths: AuthPaths,
}

/// Endpoint paths used by the auth flow.
#[derive(Debug, Clone)]
pub(crate) struct AuthPaths {
    pub(crate) login: String,
    pub(crate) permissions: String,
    pub(crate) skip_auth: Vec<String>,
}

impl std::fmt::Debug for AgoraClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgoraClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("refresher", &self.inner.refresher)
            .finish()
    }
}

impl AgoraClient {
    /// Get access to the inner client state (for API implementations).
    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the auth API (login, logout, permission refresh).
    pub fn auth(&self) -> AuthApi {
        AuthApi::new(self.clone())
    }

    /// The token store.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.inner.tokens
    }

    /// The refresh coordinator.
    pub fn refresher(&self) -> &RefreshCoordinator {
        &self.inner.refresher
    }

    /// Auth lifecycle events.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.inner.tokens.access_token()
    }

    /// Whether an access token is stored.
    pub fn is_logged_in(&self) -> bool {
        self.access_token().is_some()
    }

    /// Cached session snapshot.
    pub fn session(&self) -> Option<Session> {
        self.inner.sessions.current()
    }

    /// Permission predicates over the current session snapshot.
    pub fn permissions(&self) -> PermissionEvaluator {
        PermissionEvaluator::new(self.inner.matrix.clone(), self.inner.sessions.current())
    }

    /// Local authentication state for display.
    pub fn status(&self) -> AuthStatus {
        let session = self.session();
        AuthStatus {
            logged_in: self.is_logged_in(),
            role: session.as_ref().map(|s| s.role.clone()),
            all_roles: session
                .as_ref()
                .map(|s| s.all_roles.clone())
                .unwrap_or_default(),
            user: session.map(|s| s.user),
            token: self.inner.tokens.info(),
            refreshing: self.inner.refresher.is_refreshing(),
        }
    }

    /// Pick up token changes made by another process sharing the storage.
    ///
    /// A token clear observed this way also drops the cached session.
    pub fn sync_external(&self) -> Vec<AuthEvent> {
        let seen = self.inner.tokens.sync_external();
        if seen
            .iter()
            .any(|e| matches!(e, AuthEvent::TokensCleared { .. }))
            && self.inner.tokens.access_token().is_none()
        {
            self.inner.sessions.clear();
        }
        seen
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP verbs
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for an API path.
    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        let path = path.trim_start_matches('/');
        self.inner.base_url.join(path).map_err(Error::from)
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(Method::GET, path, |req| req).await
    }

    /// Make a GET request with query parameters.
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.execute(Method::GET, path, |req| req.query(query)).await
    }

    /// Make a POST request.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(Method::POST, path, |req| req.json(body)).await
    }

    /// Make a PUT request.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(Method::PUT, path, |req| req.json(body)).await
    }

    /// Make a PATCH request.
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(Method::PATCH, path, |req| req.json(body)).await
    }

    /// Make a DELETE request.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.execute(Method::DELETE, path, |req| req).await
    }

    /// Make a request with an arbitrary method and optional JSON body.
    pub async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(method, path, |req| match body {
            Some(body) => req.json(body),
            None => req,
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pipeline
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether `path` bypasses token logic.
    pub fn is_skip_listed(&self, path: &str) -> bool {
        self.inner
            .paths
            .skip_auth
            .iter()
            .any(|fragment| path.contains(fragment.as_str()))
    }

    async fn execute<T, F>(&self, method: Method, path: &str, prepare: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce(RequestBuilder) -> RequestBuilder,
    {
        let url = self.url(path)?;
        let authenticated = !self.is_skip_listed(path);
        let token = if authenticated {
            self.pre_send(path).await?
        } else {
            None
        };

        let mut request = self
            .inner
            .http
            .request(method.clone(), url)
            .timeout(self.inner.timeout);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        request = prepare(request);

        tracing::debug!(method = %method, path, authenticated = token.is_some(), "Sending request");
        let outcome = request.send().await;
        self.post_receive(path, authenticated, outcome).await
    }

    /// Resolve the token to attach, refreshing first when it is expiring.
    async fn pre_send(&self, path: &str) -> Result<Option<String>> {
        let tokens = &self.inner.tokens;
        let Some(pair) = tokens.get()? else {
            return Ok(None);
        };
        if !tokens.is_expiring() {
            return Ok(Some(pair.access));
        }

        tracing::debug!(path, "Access token expiring, waiting on refresh");
        match self.inner.refresher.refresh().await {
            Ok(access) => Ok(Some(access)),
            Err(err) => {
                self.teardown(err.kind);
                Err(Error::ReauthRequired(err.message))
            }
        }
    }

    async fn post_receive<T: DeserializeOwned>(
        &self,
        path: &str,
        authenticated: bool,
        outcome: reqwest::Result<reqwest::Response>,
    ) -> Result<T> {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => return Err(self.fail(path, authenticated, ClassifiedError::from_reqwest(&e))),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Err(self.fail(path, authenticated, ClassifiedError::from_reqwest(&e))),
        };

        if !status.is_success() {
            let err = classify::classify(Failure::Status {
                status: status.as_u16(),
                message: classify::message_from_body(&body),
            });
            return Err(self.fail(path, authenticated, err));
        }

        let value: serde_json::Value = if body.trim().is_empty() {
            serde_json::Value::Null
        } else {
            match serde_json::from_str(&body) {
                Ok(value) => value,
                Err(e) => {
                    let err = classify::classify(Failure::Decode {
                        message: format!("Failed to parse response body: {}", e),
                    });
                    return Err(self.fail(path, authenticated, err));
                }
            }
        };

        if normalize::declares_failure(&value) {
            let business = BusinessError::from_body(&value);
            tracing::warn!(
                path,
                code = business.code.as_deref().unwrap_or("-"),
                error = %business.message,
                "Request rejected by server"
            );
            if let Some(kind) = business.permission_kind
                && authenticated
            {
                self.teardown(kind);
            }
            return Err(Error::Business(business));
        }

        serde_json::from_value(value).map_err(|e| {
            let err = classify::classify(Failure::Decode {
                message: format!("Unexpected response shape: {}", e),
            });
            self.fail(path, authenticated, err)
        })
    }

    /// Log a classified failure and apply its session policy.
    fn fail(&self, path: &str, authenticated: bool, err: ClassifiedError) -> Error {
        tracing::warn!(
            path,
            kind = %err.kind,
            status = err.status,
            error = %err.message,
            "Request failed"
        );
        // A 401 clears credentials on any path; a 403 only when we sent them.
        if err.triggers_reauth || (authenticated && err.tears_down_session()) {
            self.teardown(err.kind);
        }
        Error::Request(err)
    }

    /// Clear session and tokens; publish one forced logout per live session.
    pub(crate) fn teardown(&self, kind: ErrorKind) {
        let had_session = self.inner.sessions.clear();
        let had_tokens = matches!(self.inner.tokens.get(), Ok(Some(_)));
        if had_tokens && let Err(e) = self.inner.tokens.clear() {
            tracing::error!(error = %e, "Failed to clear tokens during teardown");
        }
        if had_session || had_tokens {
            tracing::warn!(kind = %kind, "Session torn down, login required");
            self.inner.events.publish(AuthEvent::ForcedLogout {
                kind,
                at: self.inner.tokens.clock().now(),
            });
        }
    }
}

/// Builder for creating an AgoraClient.
pub struct ClientBuilder {
    base_url: Option<String>,
    timeout: Duration,
    refresh_buffer: chrono::Duration,
    storage: Option<Arc<dyn TokenStorage>>,
    clock: Option<Arc<dyn Clock>>,
    events: Option<EventBus>,
    matrix: PermissionMatrix,
    login_path: String,
    refresh_path: String,
    permissions_path: String,
    skip_auth_paths: Vec<String>,
    refresh_transport: Option<Arc<dyn RefreshTransport>>,
    user_agent: Option<String>,
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("refresh_buffer", &self.refresh_buffer)
            .field("storage", &self.storage)
            .field("login_path", &self.login_path)
            .field("refresh_path", &self.refresh_path)
            .field("skip_auth_paths", &self.skip_auth_paths)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            storage: None,
            clock: None,
            events: None,
            matrix: PermissionMatrix::default(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            permissions_path: DEFAULT_PERMISSIONS_PATH.to_string(),
            skip_auth_paths: DEFAULT_SKIP_AUTH_PATHS.iter().map(|s| s.to_string()).collect(),
            refresh_transport: None,
            user_agent: None,
        }
    }

    /// Set the base URL for the server.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the per-call timeout (refresh included).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how long before expiry a token counts as expiring.
    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer =
            chrono::Duration::from_std(buffer).unwrap_or(DEFAULT_REFRESH_BUFFER);
        self
    }

    /// Set the durable storage backend (default: in memory).
    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the clock used for expiry checks.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing event bus.
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the permission matrix (default: built-in matrix).
    pub fn permission_matrix(mut self, matrix: PermissionMatrix) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn permissions_path(mut self, path: impl Into<String>) -> Self {
        self.permissions_path = path.into();
        self
    }

    /// Replace the skip list of path fragments.
    pub fn skip_auth_paths<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_auth_paths = fragments.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the HTTP refresh call (tests, alternate auth servers).
    pub fn refresh_transport(mut self, transport: Arc<dyn RefreshTransport>) -> Self {
        self.refresh_transport = Some(transport);
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<AgoraClient> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Config("base_url is required".to_string()))?;

        // Parse and normalize base URL
        let mut base_url = Url::parse(&base_url)?;
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("agora-client/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let events = self.events.unwrap_or_default();

        let tokens = Arc::new(
            TokenStore::with_clock(storage.clone(), events.clone(), clock)
                .with_buffer(self.refresh_buffer),
        );
        let sessions = SessionStore::load(storage);

        let transport = match self.refresh_transport {
            Some(transport) => transport,
            None => {
                let url = base_url.join(self.refresh_path.trim_start_matches('/'))?;
                Arc::new(HttpRefreshTransport::new(http.clone(), url, self.timeout))
            }
        };
        let refresher = RefreshCoordinator::new(tokens.clone(), transport, self.timeout);

        Ok(AgoraClient {
            inner: Arc::new(ClientInner {
                http,
                base_url,
                timeout: self.timeout,
                tokens,
                sessions,
                refresher,
                events,
                matrix: Arc::new(self.matrix),
                paths: AuthPaths {
                    login: self.login_path,
                    permissions: self.permissions_path,
                    skip_auth: self.skip_auth_paths,
                },
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
