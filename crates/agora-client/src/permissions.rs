//! Role/resource/action permission evaluation.
//!
//! A pure function set over the cached [`Session`] and a static
//! [`PermissionMatrix`]. Nothing here performs I/O, and nothing here is a
//! security boundary: it decides what the UI offers, while the server
//! re-checks every request.
//!
//! The matrix is the canonical model. The older role-level comparison is
//! expressed through each role's `level` ([`PermissionEvaluator::meets_level`]),
//! and legacy `"resource:action"` strings carried in the session are merged
//! as extra grants.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Role that passes every check regardless of matrix contents.
pub const SUPER_ADMIN: &str = "SUPER_ADMIN";
pub const ADMIN: &str = "ADMIN";
pub const MODERATOR: &str = "MODERATOR";
pub const USER: &str = "USER";
pub const GUEST: &str = "GUEST";

/// Well-known actions.
pub mod actions {
    pub const CREATE: &str = "create";
    pub const READ: &str = "read";
    pub const UPDATE: &str = "update";
    pub const DELETE: &str = "delete";
    pub const PUBLISH: &str = "publish";
    pub const AUDIT: &str = "audit";
    pub const EXPORT: &str = "export";
    pub const MANAGE: &str = "manage";
}

/// Well-known resources.
pub mod resources {
    pub const NOTICE: &str = "notice";
    pub const FORUM_POST: &str = "forum_post";
    pub const FORUM_COMMENT: &str = "forum_comment";
    pub const ACTIVITY: &str = "activity";
    pub const ACTIVITY_SIGNUP: &str = "activity_signup";
    pub const USER: &str = "user";
    pub const ROLE: &str = "role";
    pub const SYSTEM: &str = "system";
}

// ─────────────────────────────────────────────────────────────────────────────
// Matrix
// ─────────────────────────────────────────────────────────────────────────────

/// What a single role may do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub level: u32,
    /// Largest batch a holder may operate on at once; `None` is unlimited.
    #[serde(default)]
    pub batch_limit: Option<usize>,
    #[serde(default)]
    pub resources: BTreeMap<String, BTreeSet<String>>,
}

impl RoleGrant {
    pub fn new(level: u32, batch_limit: Option<usize>) -> Self {
        Self {
            level,
            batch_limit,
            resources: BTreeMap::new(),
        }
    }

    /// Grant `actions` on `resource`.
    pub fn allow(mut self, resource: &str, actions: &[&str]) -> Self {
        self.resources
            .entry(resource.to_string())
            .or_default()
            .extend(actions.iter().map(|a| a.to_string()));
        self
    }

    pub fn permits(&self, resource: &str, action: &str) -> bool {
        self.resources
            .get(resource)
            .is_some_and(|set| set.contains(action))
    }
}

/// Static `role -> grant` mapping. Read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionMatrix {
    roles: BTreeMap<String, RoleGrant>,
}

impl PermissionMatrix {
    /// An empty matrix. Only `SUPER_ADMIN` passes anything against it.
    pub fn empty() -> Self {
        Self {
            roles: BTreeMap::new(),
        }
    }

    /// Add or replace a role.
    pub fn with_role(mut self, role: impl Into<String>, grant: RoleGrant) -> Self {
        self.roles.insert(role.into(), grant);
        self
    }

    /// Overlay another matrix: its roles replace level/limit and extend
    /// resource grants of same-named roles.
    pub fn merge(mut self, overrides: PermissionMatrix) -> Self {
        for (role, grant) in overrides.roles {
            match self.roles.get_mut(&role) {
                Some(existing) => {
                    existing.level = grant.level;
                    existing.batch_limit = grant.batch_limit;
                    for (resource, actions) in grant.resources {
                        existing.resources.entry(resource).or_default().extend(actions);
                    }
                }
                None => {
                    self.roles.insert(role, grant);
                }
            }
        }
        self
    }

    pub fn role(&self, role: &str) -> Option<&RoleGrant> {
        self.roles.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = (&str, &RoleGrant)> {
        self.roles.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Default for PermissionMatrix {
    /// Built-in matrix for the portal (forum, activities, notices, admin).
    fn default() -> Self {
        use actions::*;
        use resources as r;

        let guest = RoleGrant::new(0, Some(0))
            .allow(r::NOTICE, &[READ])
            .allow(r::FORUM_POST, &[READ])
            .allow(r::FORUM_COMMENT, &[READ])
            .allow(r::ACTIVITY, &[READ]);

        let user = RoleGrant::new(20, Some(10))
            .allow(r::NOTICE, &[READ])
            .allow(r::FORUM_POST, &[READ, CREATE, UPDATE, DELETE])
            .allow(r::FORUM_COMMENT, &[READ, CREATE, UPDATE, DELETE])
            .allow(r::ACTIVITY, &[READ])
            .allow(r::ACTIVITY_SIGNUP, &[CREATE, READ, DELETE]);

        let moderator = RoleGrant::new(60, Some(50))
            .allow(r::NOTICE, &[READ, CREATE, UPDATE])
            .allow(r::FORUM_POST, &[READ, CREATE, UPDATE, DELETE, AUDIT])
            .allow(r::FORUM_COMMENT, &[READ, CREATE, UPDATE, DELETE, AUDIT])
            .allow(r::ACTIVITY, &[READ, CREATE, UPDATE])
            .allow(r::ACTIVITY_SIGNUP, &[CREATE, READ, DELETE, AUDIT])
            .allow(r::USER, &[READ]);

        let admin = RoleGrant::new(80, Some(100))
            .allow(r::NOTICE, &[READ, CREATE, UPDATE, DELETE, PUBLISH])
            .allow(r::FORUM_POST, &[READ, CREATE, UPDATE, DELETE, AUDIT])
            .allow(r::FORUM_COMMENT, &[READ, CREATE, UPDATE, DELETE, AUDIT])
            .allow(r::ACTIVITY, &[READ, CREATE, UPDATE, DELETE, PUBLISH, EXPORT])
            .allow(r::ACTIVITY_SIGNUP, &[CREATE, READ, DELETE, AUDIT, EXPORT])
            .allow(r::USER, &[READ, CREATE, UPDATE, EXPORT])
            .allow(r::ROLE, &[READ]);

        Self::empty()
            .with_role(GUEST, guest)
            .with_role(USER, user)
            .with_role(MODERATOR, moderator)
            .with_role(ADMIN, admin)
            .with_role(SUPER_ADMIN, RoleGrant::new(100, None))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Conditions
// ─────────────────────────────────────────────────────────────────────────────

/// Fine-grained condition attached to a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// The target is owned by the session user.
    Owner,
    /// The check happens inside `[start, end]`; open bounds are unbounded.
    TimeWindow {
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    },
    /// The target's status is one of these.
    StatusIn(BTreeSet<String>),
    /// Every inner condition holds.
    All(Vec<Condition>),
}

impl Condition {
    pub fn status_in(statuses: &[&str]) -> Self {
        Condition::StatusIn(statuses.iter().map(|s| s.to_string()).collect())
    }
}

/// Caller-supplied facts about the target of a check.
#[derive(Debug, Clone)]
pub struct ConditionContext {
    pub owner_id: Option<String>,
    pub status: Option<String>,
    pub now: DateTime<Utc>,
}

impl ConditionContext {
    pub fn new() -> Self {
        Self {
            owner_id: None,
            status: None,
            now: Utc::now(),
        }
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

impl Default for ConditionContext {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Evaluator
// ─────────────────────────────────────────────────────────────────────────────

/// Permission predicates over one session snapshot.
#[derive(Debug, Clone)]
pub struct PermissionEvaluator {
    matrix: Arc<PermissionMatrix>,
    session: Option<Session>,
}

impl PermissionEvaluator {
    pub fn new(matrix: Arc<PermissionMatrix>, session: Option<Session>) -> Self {
        Self { matrix, session }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    fn is_super_admin(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.role == SUPER_ADMIN)
    }

    fn grants(&self) -> impl Iterator<Item = &RoleGrant> {
        self.session
            .iter()
            .flat_map(|s| s.all_roles.iter().chain(std::iter::once(&s.role)))
            .filter_map(|role| self.matrix.role(role))
    }

    /// `true` for `SUPER_ADMIN`, else iff `required` is among the session's roles.
    pub fn has_role(&self, required: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        session.role == SUPER_ADMIN || session.all_roles.iter().any(|r| r == required)
    }

    /// Legacy level comparison: the highest level among the session's roles.
    pub fn meets_level(&self, min_level: u32) -> bool {
        if self.is_super_admin() {
            return true;
        }
        self.grants().any(|g| g.level >= min_level)
    }

    /// Base grant for `action` on `resource`, with no condition.
    pub fn has_resource_permission(&self, resource: &str, action: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        if session.role == SUPER_ADMIN {
            return true;
        }
        if self.grants().any(|g| g.permits(resource, action)) {
            return true;
        }
        let legacy = format!("{}:{}", resource, action);
        session.permissions.iter().any(|p| p == &legacy)
    }

    /// Base grant plus a fine-grained condition evaluated against `ctx`.
    pub fn has_resource_permission_when(
        &self,
        resource: &str,
        action: &str,
        condition: Option<&Condition>,
        ctx: &ConditionContext,
    ) -> bool {
        if self.is_super_admin() {
            return true;
        }
        if !self.has_resource_permission(resource, action) {
            return false;
        }
        match condition {
            Some(condition) => self.evaluate(condition, ctx),
            None => true,
        }
    }

    /// Base grant plus the per-role batch ceiling.
    ///
    /// A throttle for the UI, not a security boundary.
    pub fn can_batch_operate(&self, resource: &str, action: &str, count: usize) -> bool {
        if count == 0 {
            return false;
        }
        if self.is_super_admin() {
            return true;
        }
        if !self.has_resource_permission(resource, action) {
            return false;
        }
        match self.batch_limit() {
            None => true,
            Some(limit) => count <= limit,
        }
    }

    /// Most generous batch limit among the session's roles.
    pub fn batch_limit(&self) -> Option<usize> {
        if self.is_super_admin() {
            return None;
        }
        // Any unlimited grant makes the whole session unlimited.
        self.grants()
            .try_fold(0, |best, grant| grant.batch_limit.map(|limit| best.max(limit)))
    }

    fn evaluate(&self, condition: &Condition, ctx: &ConditionContext) -> bool {
        match condition {
            Condition::Owner => match (&self.session, &ctx.owner_id) {
                (Some(session), Some(owner)) => {
                    !session.user.id.is_empty() && &session.user.id == owner
                }
                _ => false,
            },
            Condition::TimeWindow { start, end } => {
                start.is_none_or(|s| ctx.now >= s) && end.is_none_or(|e| ctx.now <= e)
            }
            Condition::StatusIn(allowed) => ctx
                .status
                .as_ref()
                .is_some_and(|status| allowed.contains(status)),
            Condition::All(conditions) => conditions.iter().all(|c| self.evaluate(c, ctx)),
        }
    }
}
