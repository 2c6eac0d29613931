//! Create/update flow of one orderable resource, as a provider would run it.
//!
//! register -> own write -> mark done -> wait for own outcome -> read back

use std::sync::Arc;

use rord_engine::{OrderRule, ReorderEngine, ReorderError, ResourceTypeKey, RuleId, RuleOrderApi};
use tracing::debug;

use crate::fake_api::{FakeRuleApi, RemoteRule};

/// Result of one full resource lifecycle.
#[derive(Clone, Debug)]
pub struct LifecycleResult {
    /// Outcome the reconciler recorded for the rule.
    pub outcome: Result<OrderRule, ReorderError>,
    /// State read back after the wait returned.
    pub read_back: Option<RemoteRule>,
}

/// Drives resources of one key through the engine against a [`FakeRuleApi`].
#[derive(Clone)]
pub struct RuleLifecycle {
    engine: ReorderEngine,
    api: Arc<FakeRuleApi>,
    key: ResourceTypeKey,
}

impl RuleLifecycle {
    pub fn new(engine: ReorderEngine, api: Arc<FakeRuleApi>, key: ResourceTypeKey) -> Self {
        Self { engine, api, key }
    }

    pub fn key(&self) -> &ResourceTypeKey {
        &self.key
    }

    pub fn api(&self) -> &Arc<FakeRuleApi> {
        &self.api
    }

    fn dyn_api(&self) -> Arc<dyn RuleOrderApi> {
        self.api.clone()
    }

    /// Create a rule and wait until its order was applied.
    ///
    /// Registration errors are returned as-is; everything after registration
    /// ends up in [`LifecycleResult::outcome`].
    pub async fn create(
        &self,
        rule_id: RuleId,
        order: OrderRule,
    ) -> Result<LifecycleResult, ReorderError> {
        self.engine
            .register(&self.key, rule_id, order, self.dyn_api())?;
        self.api.create_rule(rule_id, &format!("rule-{rule_id}"));
        self.finish(rule_id).await
    }

    /// Re-order an existing rule and wait until it was applied.
    pub async fn update(
        &self,
        rule_id: RuleId,
        order: OrderRule,
    ) -> Result<LifecycleResult, ReorderError> {
        self.engine
            .register(&self.key, rule_id, order, self.dyn_api())?;
        self.finish(rule_id).await
    }

    async fn finish(&self, rule_id: RuleId) -> Result<LifecycleResult, ReorderError> {
        self.engine.mark_done(&self.key, rule_id);
        match self.engine.wait_for_rule(&self.key, rule_id).await {
            Err(e @ (ReorderError::WaitTimeout { .. } | ReorderError::EngineReset { .. })) => {
                Err(e)
            }
            outcome => {
                let read_back = self.api.read_rule(rule_id);
                debug!(key = %self.key, %rule_id, ?read_back, "lifecycle finished");
                Ok(LifecycleResult { outcome, read_back })
            }
        }
    }
}
