//! Failure classification.
//!
//! Every failed request is mapped into exactly one [`ErrorKind`] before it
//! reaches caller code. Precedence:
//!
//! 1. No response at all (connection refused, DNS, reset) ⇒ `NETWORK_ERROR`,
//!    except an elapsed deadline which is `TIMEOUT_ERROR`.
//! 2. An HTTP status ⇒ the status table (401, 403, 422, 5xx).
//! 3. A body that could not be decoded ⇒ `PARSE_ERROR`.
//! 4. Anything else ⇒ `UNKNOWN_ERROR`.
//!
//! Business errors (`success: false` inside a 2xx body) are a separate
//! type, [`BusinessError`], and never go through the status table.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Authentication,
    #[serde(rename = "AUTHORIZATION_ERROR")]
    Authorization,
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "SERVER_ERROR")]
    Server,
    #[serde(rename = "TIMEOUT_ERROR")]
    Timeout,
    #[serde(rename = "PARSE_ERROR")]
    Parse,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::Authentication => "AUTHENTICATION_ERROR",
            Self::Authorization => "AUTHORIZATION_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Server => "SERVER_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::Parse => "PARSE_ERROR",
            Self::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Eligible for caller-directed retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Server)
    }

    /// Requires the user to log in again.
    pub fn triggers_reauth(&self) -> bool {
        matches!(self, Self::Authentication)
    }

    /// Tears down the local session (clear session + tokens, forced logout).
    pub fn tears_down_session(&self) -> bool {
        matches!(self, Self::Authentication | Self::Authorization)
    }

    /// Map an HTTP status code through the status table.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Authentication,
            403 => Self::Authorization,
            422 => Self::Validation,
            s if s >= 500 => Self::Server,
            _ => Self::Unknown,
        }
    }

    /// Default message shown to a user for this kind.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Network => "Network unavailable, please check your connection",
            Self::Authentication => "Your session has expired, please log in again",
            Self::Authorization => "You do not have permission to perform this action",
            Self::Validation => "Some of the submitted fields are invalid",
            Self::Server => "The server encountered an error, please try again later",
            Self::Timeout => "The request timed out, please try again",
            Self::Parse => "The server returned an unreadable response",
            Self::Unknown => "An unexpected error occurred",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classified error
// ─────────────────────────────────────────────────────────────────────────────

/// A failure normalized into the taxonomy. Produced once per failed request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, when the failure carried one.
    pub status: Option<u16>,
    pub retryable: bool,
    pub triggers_reauth: bool,
}

impl ClassifiedError {
    /// Build a classified error; the policy flags always follow the kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retryable: kind.is_retryable(),
            triggers_reauth: kind.triggers_reauth(),
        }
    }

    fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the UI should surface this as a transient notification.
    pub fn is_transient(&self) -> bool {
        self.retryable
    }

    /// Whether this failure clears the session and forces a logout.
    pub fn tears_down_session(&self) -> bool {
        self.kind.tears_down_session()
    }

    /// Message suitable for display.
    pub fn user_message(&self) -> &str {
        if self.message.is_empty() {
            self.kind.default_message()
        } else {
            &self.message
        }
    }

    /// Classify a `reqwest` error raised before a response was available.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let failure = if err.is_timeout() {
            Failure::NoResponse {
                message: err.to_string(),
                timed_out: true,
            }
        } else if let Some(status) = err.status() {
            Failure::Status {
                status: status.as_u16(),
                message: None,
            }
        } else if err.is_decode() {
            Failure::Decode {
                message: err.to_string(),
            }
        } else if err.is_builder() {
            Failure::Other {
                message: err.to_string(),
            }
        } else {
            Failure::NoResponse {
                message: err.to_string(),
                timed_out: false,
            }
        };
        classify(failure)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Raw description of a failure, in precedence order.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The transport produced no response.
    NoResponse { message: String, timed_out: bool },
    /// The server answered with a non-success status.
    Status { status: u16, message: Option<String> },
    /// The body could not be decoded.
    Decode { message: String },
    /// Anything else.
    Other { message: String },
}

/// Map a failure into the taxonomy.
pub fn classify(failure: Failure) -> ClassifiedError {
    match failure {
        Failure::NoResponse {
            message,
            timed_out: true,
        } => ClassifiedError::new(ErrorKind::Timeout, message),
        Failure::NoResponse { message, .. } => ClassifiedError::new(ErrorKind::Network, message),
        Failure::Status { status, message } => {
            let kind = ErrorKind::from_status(status);
            let message = message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("HTTP {}", status));
            ClassifiedError::new(kind, message).with_status(status)
        }
        Failure::Decode { message } => ClassifiedError::new(ErrorKind::Parse, message),
        Failure::Other { message } => ClassifiedError::new(ErrorKind::Unknown, message),
    }
}

/// Pull a human message out of an error body, if it has one.
pub(crate) fn message_from_body(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error", "detail"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────────────────
// Business errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error declared by a 2xx envelope with `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Business error{}: {message}", code.as_ref().map(|c| format!(" [{}]", c)).unwrap_or_default())]
pub struct BusinessError {
    pub code: Option<String>,
    pub message: String,
    /// Set when the code maps onto a permission kind; only then does the
    /// error tear down the session.
    pub permission_kind: Option<ErrorKind>,
}

impl BusinessError {
    /// Build from the `code`/`message` fields of a response body.
    pub fn from_body(body: &serde_json::Value) -> Self {
        let code = body.get("code").and_then(|c| match c {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let message = body
            .get("message")
            .or_else(|| body.get("msg"))
            .and_then(|m| m.as_str())
            .unwrap_or("Request failed")
            .to_string();
        let permission_kind = code.as_deref().and_then(permission_kind_for_code);
        Self {
            code,
            message,
            permission_kind,
        }
    }
}

fn permission_kind_for_code(code: &str) -> Option<ErrorKind> {
    match code.to_ascii_uppercase().as_str() {
        "401" | "UNAUTHORIZED" | "TOKEN_EXPIRED" | "TOKEN_INVALID" => {
            Some(ErrorKind::Authentication)
        }
        "403" | "FORBIDDEN" | "PERMISSION_DENIED" => Some(ErrorKind::Authorization),
        _ => None,
    }
}
