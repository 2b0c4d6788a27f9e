//! Single-flight token refresh.
//!
//! [`RefreshCoordinator::refresh`] guarantees at most one refresh call is
//! outstanding at any time. The first caller spawns the refresh as its own
//! task and parks a shared handle to it in the coordinator; every caller
//! that arrives while that handle is parked awaits the same handle and so
//! observes the same new token or the same error.
//!
//! The refresh task is detached from its callers: dropping every waiter
//! does not cancel it, and the parked handle is released when the task
//! finishes, whatever the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use url::Url;

use crate::classify::{self, BusinessError, ClassifiedError, ErrorKind, Failure};
use crate::normalize;
use crate::token_store::{TokenPair, TokenStore};

/// Tokens returned by the refresh endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Absent when the server keeps the old refresh token valid.
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &format_args!("<{} bytes>", self.access_token.len()))
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Performs the actual refresh call.
#[async_trait]
pub trait RefreshTransport: Send + Sync + std::fmt::Debug {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ClassifiedError>;
}

// ============================================================================
// HTTP transport
// ============================================================================

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// `POST <refresh_path>` with `{ refresh_token }`.
#[derive(Debug, Clone)]
pub struct HttpRefreshTransport {
    http: reqwest::Client,
    url: Url,
    timeout: Duration,
}

impl HttpRefreshTransport {
    pub fn new(http: reqwest::Client, url: Url, timeout: Duration) -> Self {
        Self { http, url, timeout }
    }
}

#[async_trait]
impl RefreshTransport for HttpRefreshTransport {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, ClassifiedError> {
        let response = self
            .http
            .post(self.url.clone())
            .json(&RefreshRequest { refresh_token })
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClassifiedError::from_reqwest(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifiedError::from_reqwest(&e))?;

        if !status.is_success() {
            return Err(classify::classify(Failure::Status {
                status: status.as_u16(),
                message: classify::message_from_body(&body),
            }));
        }

        let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
            classify::classify(Failure::Decode {
                message: format!("Failed to parse refresh response: {}", e),
            })
        })?;

        if normalize::declares_failure(&value) {
            let business = BusinessError::from_body(&value);
            let kind = business.permission_kind.unwrap_or(ErrorKind::Authentication);
            return Err(ClassifiedError::new(kind, business.message));
        }

        normalize::refreshed_tokens(&value).ok_or_else(|| {
            ClassifiedError::new(ErrorKind::Parse, "Refresh response has no access token")
        })
    }
}

// ============================================================================
// RefreshCoordinator
// ============================================================================

type SharedRefresh = Shared<BoxFuture<'static, Result<String, ClassifiedError>>>;

/// Serializes refresh attempts across concurrent callers.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    tokens: Arc<TokenStore>,
    transport: Arc<dyn RefreshTransport>,
    timeout: Duration,
    in_flight: Mutex<Option<SharedRefresh>>,
    waiting: AtomicUsize,
    calls: AtomicU64,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("transport", &self.inner.transport)
            .field("timeout", &self.inner.timeout)
            .field("refreshing", &self.is_refreshing())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        tokens: Arc<TokenStore>,
        transport: Arc<dyn RefreshTransport>,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CoordinatorInner {
                tokens,
                transport,
                timeout,
                in_flight: Mutex::new(None),
                waiting: AtomicUsize::new(0),
                calls: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a fresh access token, joining the in-flight refresh if any.
    ///
    /// On failure the stored tokens have already been cleared.
    pub async fn refresh(&self) -> Result<String, ClassifiedError> {
        let shared = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => {
                    tracing::debug!(
                        pending = self.inner.waiting.load(Ordering::SeqCst),
                        "Joining in-flight token refresh"
                    );
                    existing.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    let task = tokio::spawn(async move {
                        let _release = ReleaseOnDrop(inner.clone());
                        inner.run().await
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(ClassifiedError::new(
                                ErrorKind::Unknown,
                                format!("Token refresh task failed: {}", e),
                            ))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        let _waiting = WaitingGuard(&self.inner.waiting);
        shared.await
    }

    /// Whether a refresh is currently outstanding. Diagnostics only.
    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Number of callers awaiting the outstanding refresh. Diagnostics only.
    pub fn pending_count(&self) -> usize {
        self.inner.waiting.load(Ordering::SeqCst)
    }

    /// Total refresh calls issued since construction. Diagnostics only.
    pub fn refresh_calls(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }
}

impl CoordinatorInner {
    async fn run(&self) -> Result<String, ClassifiedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        tracing::info!("Refreshing access token");

        let refresh_token = match self.tokens.get() {
            Ok(Some(pair)) if !pair.refresh.is_empty() => pair.refresh,
            Ok(_) => {
                return self.fail(ClassifiedError::new(
                    ErrorKind::Authentication,
                    "No refresh token available",
                ));
            }
            Err(e) => {
                return self.fail(ClassifiedError::new(ErrorKind::Unknown, e.to_string()));
            }
        };

        let outcome =
            match tokio::time::timeout(self.timeout, self.transport.refresh(&refresh_token)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ClassifiedError::new(
                    ErrorKind::Timeout,
                    format!("Token refresh timed out after {:?}", self.timeout),
                )),
            };

        let refreshed = match outcome {
            Ok(refreshed) => refreshed,
            Err(e) => return self.fail(e),
        };

        let pair = TokenPair {
            access: refreshed.access_token,
            refresh: refreshed
                .refresh_token
                .filter(|r| !r.is_empty())
                .unwrap_or(refresh_token),
        };
        if let Err(e) = self.tokens.set(&pair) {
            return self.fail(ClassifiedError::new(ErrorKind::Unknown, e.to_string()));
        }

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Token refreshed successfully"
        );
        Ok(pair.access)
    }

    fn fail(&self, err: ClassifiedError) -> Result<String, ClassifiedError> {
        tracing::warn!(kind = %err.kind, error = %err.message, "Token refresh failed");
        if let Err(e) = self.tokens.clear() {
            tracing::error!(error = %e, "Failed to clear tokens after refresh failure");
        }
        Err(err)
    }
}

/// Releases the in-flight slot when the refresh task ends, including on panic.
struct ReleaseOnDrop(Arc<CoordinatorInner>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.in_flight.lock().take();
    }
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
