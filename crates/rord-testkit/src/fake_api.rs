//! In-memory remote rule-ordering API.
//!
//! Models the remote side the way the real service behaves: rules live in
//! one ordered list, a rule's order is its 1-based position, and "set order"
//! removes the rule and re-inserts it at the requested position, shifting
//! everything between. Applying a batch out of ascending order therefore
//! produces visibly wrong positions, which is what the scenarios check for.
//!
//! Every call is recorded so tests can assert on call counts and on the
//! relative sequence of writes, reorders and reads.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rord_engine::{ApiError, OrderRule, RuleId, RuleOrderApi};
use serde::{Deserialize, Serialize};

/// A rule as the remote API reports it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRule {
    pub id: RuleId,
    pub name: String,
    /// 1-based position in the remote list.
    pub order: i32,
    pub rank: i32,
}

/// One `set_order` call as received.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateCall {
    pub seq: u64,
    pub rule_id: RuleId,
    pub order: OrderRule,
}

/// Everything that touched the fake, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApiEvent {
    Created { rule_id: RuleId },
    Count,
    OrderSet { rule_id: RuleId, order: OrderRule },
    OrderFailed { rule_id: RuleId },
    Read { rule_id: RuleId },
}

#[derive(Default)]
struct FakeState {
    list: Vec<RuleId>,
    names: BTreeMap<RuleId, String>,
    ranks: BTreeMap<RuleId, i32>,
    calls: Vec<UpdateCall>,
    events: Vec<ApiEvent>,
    failing: BTreeSet<RuleId>,
    count_fails: bool,
    count_override: Option<u32>,
    next_seq: u64,
}

/// Deterministic stand-in for the remote rule API.
#[derive(Default)]
pub struct FakeRuleApi {
    state: Mutex<FakeState>,
    latency: Option<Duration>,
}

impl FakeRuleApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every API call sleeps `latency` first.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The registrant's own write: append a rule at the end of the list.
    pub fn create_rule(&self, rule_id: RuleId, name: &str) -> RemoteRule {
        let mut st = self.lock();
        st.list.retain(|id| *id != rule_id);
        st.list.push(rule_id);
        st.names.insert(rule_id, name.to_string());
        st.ranks.entry(rule_id).or_insert(0);
        st.events.push(ApiEvent::Created { rule_id });
        snapshot_rule(&st, rule_id).unwrap_or(RemoteRule {
            id: rule_id,
            name: name.to_string(),
            order: 0,
            rank: 0,
        })
    }

    /// Read a rule back (recorded as an event).
    pub fn read_rule(&self, rule_id: RuleId) -> Option<RemoteRule> {
        let mut st = self.lock();
        st.events.push(ApiEvent::Read { rule_id });
        snapshot_rule(&st, rule_id)
    }

    /// Current position of a rule, without recording a read.
    pub fn position_of(&self, rule_id: RuleId) -> Option<i32> {
        let st = self.lock();
        position(&st.list, rule_id)
    }

    /// Rule ids in remote order.
    pub fn ordering(&self) -> Vec<RuleId> {
        self.lock().list.clone()
    }

    /// Make every `set_order` for `rule_id` fail with a 500.
    pub fn fail_updates_for(&self, rule_id: RuleId) {
        self.lock().failing.insert(rule_id);
    }

    /// Make `rule_count` fail.
    pub fn fail_count(&self, fail: bool) {
        self.lock().count_fails = fail;
    }

    /// Report `count` instead of the real list length.
    pub fn override_count(&self, count: Option<u32>) {
        self.lock().count_override = count;
    }

    pub fn update_calls(&self) -> Vec<UpdateCall> {
        self.lock().calls.clone()
    }

    pub fn update_calls_for(&self, rule_id: RuleId) -> Vec<UpdateCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.rule_id == rule_id)
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<ApiEvent> {
        self.lock().events.clone()
    }

    async fn simulate_latency(&self) {
        if let Some(d) = self.latency {
            tokio::time::sleep(d).await;
        }
    }
}

fn position(list: &[RuleId], rule_id: RuleId) -> Option<i32> {
    list.iter()
        .position(|id| *id == rule_id)
        .and_then(|i| i32::try_from(i + 1).ok())
}

fn snapshot_rule(st: &FakeState, rule_id: RuleId) -> Option<RemoteRule> {
    let order = position(&st.list, rule_id)?;
    Some(RemoteRule {
        id: rule_id,
        name: st.names.get(&rule_id).cloned().unwrap_or_default(),
        order,
        rank: st.ranks.get(&rule_id).copied().unwrap_or(0),
    })
}

#[async_trait]
impl RuleOrderApi for FakeRuleApi {
    async fn rule_count(&self) -> Result<u32, ApiError> {
        self.simulate_latency().await;
        let mut st = self.lock();
        st.events.push(ApiEvent::Count);
        if st.count_fails {
            return Err(ApiError::Transport("count endpoint unreachable".to_string()));
        }
        let len = u32::try_from(st.list.len()).unwrap_or(u32::MAX);
        Ok(st.count_override.unwrap_or(len))
    }

    async fn set_order(&self, rule_id: RuleId, order: OrderRule) -> Result<(), ApiError> {
        self.simulate_latency().await;
        let mut st = self.lock();
        st.next_seq += 1;
        let seq = st.next_seq;
        st.calls.push(UpdateCall {
            seq,
            rule_id,
            order,
        });

        if st.failing.contains(&rule_id) {
            st.events.push(ApiEvent::OrderFailed { rule_id });
            return Err(ApiError::Api {
                status: Some(500),
                message: format!("injected failure for rule {rule_id}"),
            });
        }
        let Some(from) = st.list.iter().position(|id| *id == rule_id) else {
            st.events.push(ApiEvent::OrderFailed { rule_id });
            return Err(ApiError::Api {
                status: Some(404),
                message: format!("rule {rule_id} not found"),
            });
        };

        st.list.remove(from);
        let to = usize::try_from(order.order.max(1) - 1)
            .unwrap_or(0)
            .min(st.list.len());
        st.list.insert(to, rule_id);
        st.ranks.insert(rule_id, order.rank);
        st.events.push(ApiEvent::OrderSet { rule_id, order });
        Ok(())
    }
}
