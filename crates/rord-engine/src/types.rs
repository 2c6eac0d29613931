use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Remote identifier of an orderable rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names one class of orderable rules (e.g. one per policy type).
///
/// Reorder cycles for distinct keys are scheduled independently.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTypeKey(pub String);

impl ResourceTypeKey {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceTypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceTypeKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// OrderRule
// ---------------------------------------------------------------------------

/// Desired final position of a rule.
///
/// `order` is 1-based. `rank` breaks ties when several rules of one batch ask
/// for the same `order` (lower rank goes first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderRule {
    pub order: i32,
    pub rank: i32,
}

impl OrderRule {
    pub fn new(order: i32, rank: i32) -> Self {
        Self { order, rank }
    }

    /// Same rank, different position.
    pub fn with_order(self, order: i32) -> Self {
        Self { order, ..self }
    }
}

/// Batch ordering: `order` ascending, then `rank` ascending, then rule id so
/// the sequence of remote calls is fully deterministic.
pub fn batch_cmp(a: (RuleId, &OrderRule), b: (RuleId, &OrderRule)) -> Ordering {
    a.1.order
        .cmp(&b.1.order)
        .then(a.1.rank.cmp(&b.1.rank))
        .then(a.0.cmp(&b.0))
}
