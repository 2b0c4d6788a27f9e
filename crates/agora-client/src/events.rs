//! Auth event fan-out.
//!
//! Other execution contexts (UI views, other windows, a background
//! watcher) learn about token changes and forced logouts here. Events carry
//! timestamps only, never token values.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::classify::ErrorKind;

/// Broadcast channel capacity. Slow receivers observe `Lagged` and skip ahead.
const EVENT_CAPACITY: usize = 64;

/// An auth lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "topic", rename_all = "kebab-case")]
pub enum AuthEvent {
    /// New tokens were persisted.
    TokensUpdated { at: DateTime<Utc> },
    /// Tokens were removed.
    TokensCleared { at: DateTime<Utc> },
    /// The session was torn down because of an auth failure.
    ForcedLogout { kind: ErrorKind, at: DateTime<Utc> },
}

impl AuthEvent {
    /// Topic name of the event.
    pub fn topic(&self) -> &'static str {
        match self {
            AuthEvent::TokensUpdated { .. } => "tokens-updated",
            AuthEvent::TokensCleared { .. } => "tokens-cleared",
            AuthEvent::ForcedLogout { .. } => "forced-logout",
        }
    }
}

/// Cloneable publisher for [`AuthEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: AuthEvent) {
        tracing::debug!(topic = event.topic(), "auth event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        let at = Utc::now();
        bus.publish(AuthEvent::TokensCleared { at });

        assert_eq!(a.recv().await.unwrap(), AuthEvent::TokensCleared { at });
        assert_eq!(b.recv().await.unwrap().topic(), "tokens-cleared");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(AuthEvent::TokensUpdated { at: Utc::now() });
    }

    #[test]
    fn test_event_serializes_with_topic() {
        let event = AuthEvent::ForcedLogout {
            kind: ErrorKind::Authorization,
            at: DateTime::from_timestamp(0, 0).unwrap(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["topic"], "forced-logout");
        assert_eq!(value["kind"], "AUTHORIZATION_ERROR");
    }
}
