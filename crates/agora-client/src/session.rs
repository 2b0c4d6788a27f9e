//! Cached user session: who is logged in and which roles they hold.
//!
//! The session is a snapshot for gating UI actions and is mutated only by
//! login, logout, a permission refresh, and forced logout. The server stays
//! the authority on every request.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::storage::{StorageError, TokenStorage};

/// Storage key for the persisted session snapshot.
pub const SESSION_KEY: &str = "session";

/// Role used when a login response names none.
pub const DEFAULT_ROLE: &str = "USER";

/// The logged-in user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Canonical session shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    /// Primary role; always contained in `all_roles`.
    pub role: String,
    /// Legacy permission strings (`"resource:action"`).
    #[serde(default)]
    pub permissions: Vec<String>,
    pub all_roles: Vec<String>,
}

impl Session {
    pub fn new(user: User, role: impl Into<String>) -> Self {
        let role = role.into();
        Self {
            user,
            all_roles: vec![role.clone()],
            role,
            permissions: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.all_roles = roles.into_iter().map(Into::into).collect();
        self.ensure_primary_role();
        self
    }

    pub fn with_permissions(
        mut self,
        permissions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Apply a permission refresh, keeping the user.
    pub fn apply(&mut self, snapshot: PermissionSnapshot) {
        if let Some(role) = snapshot.role {
            self.role = role;
        }
        if let Some(permissions) = snapshot.permissions {
            self.permissions = permissions;
        }
        if let Some(all_roles) = snapshot.all_roles {
            self.all_roles = all_roles;
        }
        self.ensure_primary_role();
    }

    pub(crate) fn ensure_primary_role(&mut self) {
        if !self.all_roles.iter().any(|r| r == &self.role) {
            self.all_roles.insert(0, self.role.clone());
        }
    }
}

/// Role/permission data as returned by a permission refresh. Fields the
/// server omitted are `None` and leave the session untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSnapshot {
    pub role: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub all_roles: Option<Vec<String>>,
}

// ============================================================================
// SessionStore
// ============================================================================

/// In-memory session snapshot mirrored into storage.
#[derive(Debug)]
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
    current: RwLock<Option<Session>>,
}

impl SessionStore {
    /// Create a store, restoring any persisted snapshot.
    pub fn load(storage: Arc<dyn TokenStorage>) -> Self {
        let restored = match storage.get(SESSION_KEY) {
            Ok(Some(json)) => match serde_json::from_str::<Session>(&json) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring unreadable session snapshot");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read session snapshot");
                None
            }
        };
        Self {
            storage,
            current: RwLock::new(restored),
        }
    }

    /// Current session snapshot.
    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn is_active(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replace the session.
    pub fn set(&self, session: Session) -> Result<(), StorageError> {
        self.persist(&session)?;
        *self.current.write() = Some(session);
        Ok(())
    }

    /// Apply a permission refresh to the active session.
    ///
    /// Returns the updated session, or `None` when nobody is logged in.
    pub fn update_permissions(
        &self,
        snapshot: PermissionSnapshot,
    ) -> Result<Option<Session>, StorageError> {
        let mut guard = self.current.write();
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };
        session.apply(snapshot);
        let updated = session.clone();
        drop(guard);
        self.persist(&updated)?;
        Ok(Some(updated))
    }

    /// Destroy the session. Returns whether one existed.
    pub fn clear(&self) -> bool {
        let had = self.current.write().take().is_some();
        if let Err(e) = self.storage.remove_entries(&[SESSION_KEY]) {
            tracing::warn!(error = %e, "Failed to remove session snapshot");
        }
        had
    }

    fn persist(&self, session: &Session) -> Result<(), StorageError> {
        let json = serde_json::to_string(session)
            .map_err(|e| StorageError::Corrupt(format!("Failed to serialize session: {}", e)))?;
        self.storage.set_entries(&[(SESSION_KEY, &json)])
    }
}
