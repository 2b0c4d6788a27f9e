//! Response-shape normalization for the auth endpoints.
//!
//! Login, refresh and permission responses come in several envelopes
//! (flat, `{success, data}`, camelCase, nested `tokens`). They are all
//! folded into the canonical types here, once, at the pipeline boundary.

use serde_json::Value;

use crate::classify::{ClassifiedError, ErrorKind};
use crate::refresh::RefreshedTokens;
use crate::session::{DEFAULT_ROLE, PermissionSnapshot, Session, User};
use crate::token_store::TokenPair;

const ACCESS_KEYS: &[&str] = &["access_token", "accessToken", "token", "access"];
const REFRESH_KEYS: &[&str] = &["refresh_token", "refreshToken", "refresh"];

/// A successful login, normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub session: Session,
}

/// Whether the body is an envelope declaring `success: false`.
pub fn declares_failure(body: &Value) -> bool {
    matches!(body.get("success"), Some(Value::Bool(false)))
}

/// Strip a `{success, data}` / `{code, data}` envelope, if present.
pub fn unwrap_envelope(body: &Value) -> &Value {
    match body.get("data") {
        Some(data @ Value::Object(_))
            if body.get("success").is_some() || body.get("code").is_some() =>
        {
            data
        }
        _ => body,
    }
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(_) => string_field(item, &["code", "name", "key"]),
                _ => None,
            })
            .collect(),
    )
}

fn token_fields(payload: &Value) -> Option<(String, Option<String>)> {
    let source = match payload.get("tokens") {
        Some(tokens @ Value::Object(_)) => tokens,
        _ => payload,
    };
    let access = string_field(source, ACCESS_KEYS)?;
    Some((access, string_field(source, REFRESH_KEYS)))
}

/// Tokens from a refresh response.
pub fn refreshed_tokens(body: &Value) -> Option<RefreshedTokens> {
    let (access_token, refresh_token) = token_fields(unwrap_envelope(body))?;
    Some(RefreshedTokens {
        access_token,
        refresh_token,
    })
}

fn user_from(value: Option<&Value>) -> User {
    let Some(value) = value.filter(|v| v.is_object()) else {
        return User::default();
    };
    User {
        id: string_field(value, &["id", "user_id", "userId", "uid"]).unwrap_or_default(),
        username: string_field(value, &["username", "account", "login"]),
        display_name: string_field(value, &["display_name", "displayName", "nickname", "name"]),
        email: string_field(value, &["email"]),
    }
}

/// Role/permission data from either a permissions object or a bare list.
pub fn permission_snapshot(payload: &Value) -> PermissionSnapshot {
    let mut snapshot = PermissionSnapshot::default();

    match payload.get("permissions") {
        Some(list @ Value::Array(_)) => snapshot.permissions = string_list(Some(list)),
        Some(obj @ Value::Object(_)) => {
            snapshot.role = string_field(obj, &["role", "current_role", "currentRole"]);
            snapshot.permissions = string_list(obj.get("permissions"));
            snapshot.all_roles = string_list(obj.get("all_roles").or_else(|| obj.get("allRoles")))
                .or_else(|| string_list(obj.get("roles")));
        }
        _ => {}
    }

    if snapshot.role.is_none() {
        snapshot.role = string_field(payload, &["role", "current_role", "currentRole"]);
    }
    if snapshot.all_roles.is_none() {
        snapshot.all_roles = string_list(payload.get("all_roles"))
            .or_else(|| string_list(payload.get("allRoles")))
            .or_else(|| string_list(payload.get("roles")));
    }
    snapshot
}

/// Normalize a login response into tokens and a session.
pub fn login_outcome(body: &Value) -> Result<LoginOutcome, ClassifiedError> {
    let payload = unwrap_envelope(body);
    let (access, refresh) = token_fields(payload).ok_or_else(|| {
        ClassifiedError::new(ErrorKind::Parse, "Login response has no access token")
    })?;

    let user_value = payload.get("user").or_else(|| payload.get("userInfo"));
    let user = user_from(user_value);
    let snapshot = permission_snapshot(payload);

    let all_roles = snapshot.all_roles.unwrap_or_default();
    let role = snapshot
        .role
        .or_else(|| user_value.and_then(|u| string_field(u, &["role"])))
        .or_else(|| all_roles.first().cloned())
        .unwrap_or_else(|| DEFAULT_ROLE.to_string());

    let mut session = Session {
        user,
        role,
        permissions: snapshot.permissions.unwrap_or_default(),
        all_roles,
    };
    session.ensure_primary_role();

    Ok(LoginOutcome {
        tokens: TokenPair {
            access,
            refresh: refresh.unwrap_or_default(),
        },
        session,
    })
}
