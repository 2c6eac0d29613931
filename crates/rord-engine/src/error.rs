use std::fmt;
use std::time::Duration;

use crate::types::{ResourceTypeKey, RuleId};

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Errors a [`RuleOrderApi`](crate::RuleOrderApi) implementation may return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiError {
    /// Network or transport failure.
    Transport(String),
    /// The remote API answered with an application-level error.
    Api { status: Option<u16>, message: String },
    /// A response payload could not be decoded.
    Decode(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Transport(msg) => write!(f, "transport error: {msg}"),
            ApiError::Api {
                status: Some(s),
                message,
            } => write!(f, "rule api error status={s}: {message}"),
            ApiError::Api {
                status: None,
                message,
            } => write!(f, "rule api error: {message}"),
            ApiError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

// ---------------------------------------------------------------------------
// ReorderError
// ---------------------------------------------------------------------------

/// Everything the reorder engine can report back to a registrant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReorderError {
    /// `order` must be 1-based.
    InvalidOrder { rule_id: RuleId, order: i32 },
    /// The before-reorder hook refused the registration.
    Hook { rule_id: RuleId, message: String },
    /// `order` exceeds the remote rule count and the policy is `reject`.
    OrderOutOfRange {
        rule_id: RuleId,
        order: i32,
        count: u32,
    },
    /// The remote "set order" call failed for this rule.
    Update { rule_id: RuleId, source: ApiError },
    /// Nothing is pending, in flight or recorded for this rule.
    UnknownRule {
        key: ResourceTypeKey,
        rule_id: RuleId,
    },
    /// The wait bound elapsed before the cycle completed.
    WaitTimeout {
        key: ResourceTypeKey,
        waited: Duration,
    },
    /// The engine was reset (or dropped) while the caller was waiting.
    EngineReset { key: ResourceTypeKey },
    /// Engine construction outside a Tokio runtime.
    NoRuntime,
    /// Settings the engine cannot run with (e.g. a zero tick interval).
    InvalidSettings { message: String },
}

impl fmt::Display for ReorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReorderError::InvalidOrder { rule_id, order } => {
                write!(f, "rule {rule_id}: order must be >= 1 (got {order})")
            }
            ReorderError::Hook { rule_id, message } => {
                write!(f, "rule {rule_id}: before-reorder hook failed: {message}")
            }
            ReorderError::OrderOutOfRange {
                rule_id,
                order,
                count,
            } => write!(
                f,
                "rule {rule_id}: order {order} exceeds remote rule count {count}"
            ),
            ReorderError::Update { rule_id, source } => {
                write!(f, "rule {rule_id}: set order failed: {source}")
            }
            ReorderError::UnknownRule { key, rule_id } => {
                write!(f, "rule {rule_id} has no reorder state under key '{key}'")
            }
            ReorderError::WaitTimeout { key, waited } => write!(
                f,
                "timed out after {}ms waiting for reorder of key '{key}'",
                waited.as_millis()
            ),
            ReorderError::EngineReset { key } => {
                write!(f, "reorder engine reset while waiting on key '{key}'")
            }
            ReorderError::NoRuntime => {
                write!(f, "reorder engine requires a running tokio runtime")
            }
            ReorderError::InvalidSettings { message } => {
                write!(f, "invalid reorder settings: {message}")
            }
        }
    }
}

impl std::error::Error for ReorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReorderError::Update { source, .. } => Some(source),
            _ => None,
        }
    }
}
