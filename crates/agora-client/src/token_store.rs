//! Token persistence and expiry inspection.
//!
//! [`TokenStore`] is the only component that writes credentials. Both
//! tokens go through [`TokenStore::set`] and [`TokenStore::clear`]; every
//! write also stamps a marker key and publishes an [`AuthEvent`] so other
//! contexts sharing the storage can react.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::events::{AuthEvent, EventBus};
use crate::jwt;
use crate::storage::{StorageError, TokenStorage};

/// Storage key of the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Marker stamped with a unix-millis timestamp whenever tokens are written.
pub const TOKEN_UPDATED_KEY: &str = "token_updated";
/// Marker stamped with a unix-millis timestamp whenever tokens are removed.
pub const TOKEN_CLEARED_KEY: &str = "token_cleared";

/// Buffer before expiry at which a token counts as expiring (5 minutes).
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

/// Access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            refresh: refresh.into(),
        }
    }
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access", &format_args!("<{} bytes>", self.access.len()))
            .field("refresh", &format_args!("<{} bytes>", self.refresh.len()))
            .finish()
    }
}

// ============================================================================
// TokenStore
// ============================================================================

/// Persisted token pair plus expiry checks against a clock.
#[derive(Debug)]
pub struct TokenStore {
    storage: Arc<dyn TokenStorage>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    buffer: Duration,
    last_updated_seen: AtomicI64,
    last_cleared_seen: AtomicI64,
}

impl TokenStore {
    /// Create a store over the given storage using the system clock.
    pub fn new(storage: Arc<dyn TokenStorage>, events: EventBus) -> Self {
        Self::with_clock(storage, events, Arc::new(SystemClock))
    }

    /// Create a store with a custom clock.
    pub fn with_clock(
        storage: Arc<dyn TokenStorage>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Self {
            storage,
            events,
            clock,
            buffer: DEFAULT_REFRESH_BUFFER,
            last_updated_seen: AtomicI64::new(0),
            last_cleared_seen: AtomicI64::new(0),
        };
        store.last_updated_seen.store(
            store.marker(TOKEN_UPDATED_KEY).unwrap_or(0),
            Ordering::SeqCst,
        );
        store.last_cleared_seen.store(
            store.marker(TOKEN_CLEARED_KEY).unwrap_or(0),
            Ordering::SeqCst,
        );
        store
    }

    /// Override the expiry buffer.
    pub fn with_buffer(mut self, buffer: Duration) -> Self {
        self.buffer = buffer;
        self
    }

    /// The expiry buffer.
    pub fn buffer(&self) -> Duration {
        self.buffer
    }

    /// The clock used for expiry checks.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The underlying storage.
    pub fn storage(&self) -> &Arc<dyn TokenStorage> {
        &self.storage
    }

    /// Read the stored pair.
    ///
    /// A pair only exists when the access token does; a missing refresh
    /// token reads as empty.
    pub fn get(&self) -> Result<Option<TokenPair>, StorageError> {
        let Some(access) = self.storage.get(ACCESS_TOKEN_KEY)? else {
            return Ok(None);
        };
        if access.is_empty() {
            return Ok(None);
        }
        let refresh = self.storage.get(REFRESH_TOKEN_KEY)?.unwrap_or_default();
        Ok(Some(TokenPair { access, refresh }))
    }

    /// Current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        match self.get() {
            Ok(pair) => pair.map(|p| p.access),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read access token");
                None
            }
        }
    }

    /// Persist both tokens and signal `tokens-updated`.
    pub fn set(&self, pair: &TokenPair) -> Result<(), StorageError> {
        let now = self.clock.now();
        let stamp = now.timestamp_millis().to_string();
        self.storage.set_entries(&[
            (ACCESS_TOKEN_KEY, &pair.access),
            (REFRESH_TOKEN_KEY, &pair.refresh),
            (TOKEN_UPDATED_KEY, &stamp),
        ])?;
        self.last_updated_seen
            .store(now.timestamp_millis(), Ordering::SeqCst);

        tracing::info!(
            access_len = pair.access.len(),
            has_refresh = !pair.refresh.is_empty(),
            "Tokens saved"
        );
        self.events.publish(AuthEvent::TokensUpdated { at: now });
        Ok(())
    }

    /// Remove both tokens and signal `tokens-cleared`.
    pub fn clear(&self) -> Result<(), StorageError> {
        let now = self.clock.now();
        let stamp = now.timestamp_millis().to_string();
        self.storage
            .remove_entries(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])?;
        self.storage.set_entries(&[(TOKEN_CLEARED_KEY, &stamp)])?;
        self.last_cleared_seen
            .store(now.timestamp_millis(), Ordering::SeqCst);

        tracing::info!("Tokens cleared");
        self.events.publish(AuthEvent::TokensCleared { at: now });
        Ok(())
    }

    /// Whether the access token is expired or inside the refresh buffer.
    ///
    /// Fails closed: a token that cannot be decoded, or has no numeric
    /// `exp`, counts as expiring and is cleared on the spot. With no token
    /// at all this returns `true` without side effects.
    pub fn is_expiring(&self) -> bool {
        let access = match self.storage.get(ACCESS_TOKEN_KEY) {
            Ok(Some(access)) if !access.is_empty() => access,
            Ok(_) => return true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read access token");
                return true;
            }
        };

        match jwt::expiry(&access) {
            Ok(exp) => {
                let now_ms = self.clock.now().timestamp_millis();
                let threshold_ms = exp
                    .saturating_mul(1000)
                    .saturating_sub(self.buffer.num_milliseconds());
                now_ms >= threshold_ms
            }
            Err(e) => {
                tracing::warn!(reason = %e, "Discarding corrupt access token");
                if let Err(e) = self.clear() {
                    tracing::error!(error = %e, "Failed to clear corrupt tokens");
                }
                true
            }
        }
    }

    /// Seconds until the access token's `exp`; 0 when absent or unreadable.
    pub fn remaining_seconds(&self) -> u64 {
        let Some(access) = self.access_token() else {
            return 0;
        };
        match jwt::expiry(&access) {
            Ok(exp) => exp.saturating_sub(self.clock.now().timestamp()).max(0) as u64,
            Err(_) => 0,
        }
    }

    /// Expiry information for display.
    pub fn info(&self) -> Option<TokenInfo> {
        let access = self.access_token()?;
        let expires_at = jwt::expiry(&access)
            .ok()
            .and_then(|exp| DateTime::from_timestamp(exp, 0));
        Some(TokenInfo {
            expires_in_secs: self.remaining_seconds(),
            is_expiring: self.is_expiring(),
            expires_at,
        })
    }

    /// Pick up writes made by another process sharing this storage.
    ///
    /// Compares the marker timestamps with the last ones seen and publishes
    /// the corresponding event for each newer marker.
    pub fn sync_external(&self) -> Vec<AuthEvent> {
        let mut seen = Vec::new();
        let checks = [
            (TOKEN_UPDATED_KEY, &self.last_updated_seen, true),
            (TOKEN_CLEARED_KEY, &self.last_cleared_seen, false),
        ];
        for (key, last, updated) in checks {
            let Some(stamp) = self.marker(key) else {
                continue;
            };
            if stamp > last.fetch_max(stamp, Ordering::SeqCst) {
                let at = DateTime::from_timestamp_millis(stamp).unwrap_or_else(|| self.clock.now());
                let event = if updated {
                    AuthEvent::TokensUpdated { at }
                } else {
                    AuthEvent::TokensCleared { at }
                };
                tracing::debug!(topic = event.topic(), "External token change");
                self.events.publish(event.clone());
                seen.push(event);
            }
        }
        seen
    }

    fn marker(&self, key: &str) -> Option<i64> {
        self.storage
            .get(key)
            .ok()
            .flatten()
            .and_then(|v| v.trim().parse().ok())
    }
}

// ============================================================================
// TokenInfo
// ============================================================================

/// Information about stored tokens for display.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    pub expires_in_secs: u64,
    pub is_expiring: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenInfo {
    pub fn expires_in_display(&self) -> String {
        if self.expires_in_secs == 0 {
            "Expired (will refresh on next use)".to_string()
        } else {
            let hours = self.expires_in_secs / 3600;
            let minutes = (self.expires_in_secs % 3600) / 60;
            format!("{}h {}m", hours, minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::jwt::encode_unsigned;
    use crate::storage::{FileStorage, MemoryStorage};
    use serde_json::json;
    use tempfile::tempdir;

    fn store_with_clock() -> (TokenStore, Arc<ManualClock>, Arc<MemoryStorage>, EventBus) {
        let clock = Arc::new(ManualClock::at_current_second());
        let storage = Arc::new(MemoryStorage::new());
        let events = EventBus::new();
        let store = TokenStore::with_clock(storage.clone(), events.clone(), clock.clone());
        (store, clock, storage, events)
    }

    fn token_expiring_at(exp: i64) -> String {
        encode_unsigned(&json!({"sub": "7", "exp": exp}))
    }

    #[test]
    fn test_set_and_get() {
        let (store, clock, _, _) = store_with_clock();
        assert_eq!(store.get().unwrap(), None);

        let pair = TokenPair::new(token_expiring_at(clock.now().timestamp() + 3600), "r1");
        store.set(&pair).unwrap();
        assert_eq!(store.get().unwrap(), Some(pair.clone()));
        assert_eq!(store.access_token(), Some(pair.access));
    }

    #[test]
    fn test_clear_removes_both() {
        let (store, clock, storage, _) = store_with_clock();
        store
            .set(&TokenPair::new(token_expiring_at(clock.now().timestamp() + 60), "r"))
            .unwrap();
        store.clear().unwrap();

        assert_eq!(store.get().unwrap(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert!(storage.get(TOKEN_CLEARED_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_signals_carry_no_token() {
        let (store, clock, _, events) = store_with_clock();
        let mut rx = events.subscribe();

        store
            .set(&TokenPair::new(token_expiring_at(clock.now().timestamp() + 60), "secret-refresh"))
            .unwrap();
        store.clear().unwrap();

        let updated = rx.recv().await.unwrap();
        assert_eq!(updated, AuthEvent::TokensUpdated { at: clock.now() });
        let cleared = rx.recv().await.unwrap();
        assert_eq!(cleared.topic(), "tokens-cleared");
        assert!(!serde_json::to_string(&updated).unwrap().contains("secret"));
    }

    #[test]
    fn test_buffer_boundary() {
        let (store, clock, _, _) = store_with_clock();
        let now = clock.now().timestamp();

        store
            .set(&TokenPair::new(token_expiring_at(now + 300), "r"))
            .unwrap();
        assert!(store.is_expiring());

        store
            .set(&TokenPair::new(token_expiring_at(now + 301), "r"))
            .unwrap();
        assert!(!store.is_expiring());

        clock.advance(Duration::seconds(1));
        assert!(store.is_expiring());
    }

    #[test]
    fn test_corrupt_token_fails_closed_and_clears() {
        let (store, _, storage, _) = store_with_clock();
        store.set(&TokenPair::new("not-a-jwt", "r")).unwrap();

        assert!(store.is_expiring());
        assert_eq!(store.get().unwrap(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn test_non_numeric_exp_fails_closed_and_clears() {
        let (store, _, _, _) = store_with_clock();
        let token = encode_unsigned(&json!({"exp": "soon"}));
        store.set(&TokenPair::new(token, "r")).unwrap();

        assert!(store.is_expiring());
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn test_no_token_is_expiring_without_side_effects() {
        let (store, _, storage, _) = store_with_clock();
        assert!(store.is_expiring());
        assert!(storage.get(TOKEN_CLEARED_KEY).unwrap().is_none());
    }

    #[test]
    fn test_remaining_seconds() {
        let (store, clock, _, _) = store_with_clock();
        assert_eq!(store.remaining_seconds(), 0);

        let now = clock.now().timestamp();
        store
            .set(&TokenPair::new(token_expiring_at(now + 7200), "r"))
            .unwrap();
        assert_eq!(store.remaining_seconds(), 7200);

        clock.advance(Duration::hours(3));
        assert_eq!(store.remaining_seconds(), 0);

        store.set(&TokenPair::new("garbage", "r")).unwrap();
        assert_eq!(store.remaining_seconds(), 0);
    }

    #[test]
    fn test_sync_external_sees_other_writer() {
        let temp = tempdir().unwrap();
        let clock = Arc::new(ManualClock::at_current_second());
        let ours = TokenStore::with_clock(
            Arc::new(FileStorage::new(temp.path())),
            EventBus::new(),
            clock.clone(),
        );
        let theirs = TokenStore::with_clock(
            Arc::new(FileStorage::new(temp.path())),
            EventBus::new(),
            clock.clone(),
        );

        assert!(ours.sync_external().is_empty());

        clock.advance(Duration::seconds(5));
        theirs
            .set(&TokenPair::new(token_expiring_at(clock.now().timestamp() + 600), "r"))
            .unwrap();
        let events = ours.sync_external();
        assert_eq!(events, vec![AuthEvent::TokensUpdated { at: clock.now() }]);
        assert!(ours.sync_external().is_empty());

        clock.advance(Duration::seconds(5));
        theirs.clear().unwrap();
        let events = ours.sync_external();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].topic(), "tokens-cleared");
        assert_eq!(ours.get().unwrap(), None);
    }

    #[test]
    fn test_token_info_display() {
        let expired = TokenInfo {
            expires_in_secs: 0,
            is_expiring: true,
            expires_at: None,
        };
        assert!(expired.expires_in_display().contains("Expired"));

        let valid = TokenInfo {
            expires_in_secs: 7200,
            is_expiring: false,
            expires_at: None,
        };
        assert_eq!(valid.expires_in_display(), "2h 0m");
    }

    #[test]
    fn test_pair_debug_hides_values() {
        let pair = TokenPair::new("aaaa", "bbbb");
        let debug = format!("{:?}", pair);
        assert!(!debug.contains("aaaa"));
        assert!(debug.contains("4 bytes"));
    }
}
