//! `ReorderEngine`: the handle callers hold.
//!
//! Constructed once per process (or per test) and cloned into every
//! create/update flow. Cloning is cheap; all clones share one registry.
//!
//! Caller lifecycle:
//!
//! ```text
//! register  ->  own remote write  ->  mark_done  ->  wait_for_rule / wait_for_reorder  ->  read
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::api::RuleOrderApi;
use crate::error::ReorderError;
use crate::gate;
use crate::reconcile::CycleReport;
use crate::registry::{KeyStats, PendingEntry, Registry};
use crate::scheduler;
use crate::settings::EngineSettings;
use crate::types::{OrderRule, ResourceTypeKey, RuleId};

struct Inner {
    runtime: Handle,
    defaults: EngineSettings,
    settings: Mutex<EngineSettings>,
    registry: Registry,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.registry.clear();
    }
}

/// Cloneable handle to the reorder registry, tickers and gates.
#[derive(Clone)]
pub struct ReorderEngine {
    inner: Arc<Inner>,
}

impl fmt::Debug for ReorderEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReorderEngine")
            .field("settings", &self.settings())
            .field("keys", &self.keys())
            .finish()
    }
}

impl ReorderEngine {
    /// Build on the current Tokio runtime.
    pub fn new(settings: EngineSettings) -> Result<Self, ReorderError> {
        let runtime = Handle::try_current().map_err(|_| ReorderError::NoRuntime)?;
        Self::with_runtime(settings, runtime)
    }

    /// Build with tickers spawned on `runtime`.
    ///
    /// Fails with `InvalidSettings` when [`EngineSettings::validate`] does.
    pub fn with_runtime(settings: EngineSettings, runtime: Handle) -> Result<Self, ReorderError> {
        settings.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                runtime,
                defaults: settings.clone(),
                settings: Mutex::new(settings),
                registry: Registry::default(),
            }),
        })
    }

    /// Settings applied to keys created from now on.
    pub fn settings(&self) -> EngineSettings {
        self.inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Override the tick interval for keys created after this call.
    /// Existing tickers keep their interval until `reset`.
    ///
    /// A zero interval is refused with `InvalidSettings`.
    pub fn set_tick_interval(&self, interval: Duration) -> Result<(), ReorderError> {
        if interval.is_zero() {
            return Err(ReorderError::InvalidSettings {
                message: "tick_interval must be > 0".to_string(),
            });
        }
        self.inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tick_interval = interval;
        Ok(())
    }

    /// Queue `rule_id` to be moved to `order` by the next cycle of `key`.
    ///
    /// Creates the key's state and arms its ticker on first use. Overwrites a
    /// previous request for the same rule (which then needs `mark_done`
    /// again). Never blocks.
    pub fn register(
        &self,
        key: &ResourceTypeKey,
        rule_id: RuleId,
        order: OrderRule,
        api: Arc<dyn RuleOrderApi>,
    ) -> Result<(), ReorderError> {
        self.register_with_hook(key, rule_id, order, api, |_, _| Ok::<(), String>(()))
    }

    /// [`register`](Self::register) with a hook run synchronously before the
    /// entry is queued. A hook error rejects the registration.
    ///
    /// The hook only sees the rule id and requested order; registration never
    /// awaits, so it cannot reach the remote. A bounds check against the
    /// current rule count needs the count fetched beforehand (e.g.
    /// `api.rule_count().await`) and captured by the hook.
    pub fn register_with_hook<H, E>(
        &self,
        key: &ResourceTypeKey,
        rule_id: RuleId,
        order: OrderRule,
        api: Arc<dyn RuleOrderApi>,
        before_reorder: H,
    ) -> Result<(), ReorderError>
    where
        H: FnOnce(RuleId, OrderRule) -> Result<(), E>,
        E: fmt::Display,
    {
        if order.order < 1 {
            return Err(ReorderError::InvalidOrder {
                rule_id,
                order: order.order,
            });
        }

        before_reorder(rule_id, order).map_err(|e| ReorderError::Hook {
            rule_id,
            message: e.to_string(),
        })?;

        let settings = self.settings();
        let runtime = &self.inner.runtime;
        let cycle = self
            .inner
            .registry
            .get_or_create(key, &settings, |c| scheduler::spawn_ticker(runtime, c));

        // A concurrent `reset` may have closed the cycle between lookup and insert.
        if !cycle.insert(PendingEntry {
            rule_id,
            desired: order,
            done: false,
            api,
        }) {
            return Err(ReorderError::EngineReset { key: key.clone() });
        }
        debug!(%key, %rule_id, order = order.order, rank = order.rank, "reorder registered");
        Ok(())
    }

    /// Flag the rule as ready for the next cycle.
    ///
    /// Marking an unregistered rule is a caller bug and is ignored; the
    /// return value says whether an entry was found.
    pub fn mark_done(&self, key: &ResourceTypeKey, rule_id: RuleId) -> bool {
        let found = self
            .inner
            .registry
            .get(key)
            .map(|c| c.mark_done(rule_id))
            .unwrap_or(false);
        if !found {
            debug!(%key, %rule_id, "mark_done for unregistered rule ignored");
        }
        found
    }

    /// Block until the cycle covering every done rule of `key` completed.
    ///
    /// Uses the configured `wait_timeout`, if any. Returning `Ok` does not
    /// mean every rule was applied; see [`wait_for_rule`](Self::wait_for_rule).
    pub async fn wait_for_reorder(&self, key: &ResourceTypeKey) -> Result<(), ReorderError> {
        let limit = self.settings().wait_timeout;
        self.bounded(key, limit, self.cycle_wait(key)).await
    }

    pub async fn wait_for_reorder_within(
        &self,
        key: &ResourceTypeKey,
        limit: Duration,
    ) -> Result<(), ReorderError> {
        self.bounded(key, Some(limit), self.cycle_wait(key)).await
    }

    /// Block until `rule_id` was processed and return its outcome.
    pub async fn wait_for_rule(
        &self,
        key: &ResourceTypeKey,
        rule_id: RuleId,
    ) -> Result<OrderRule, ReorderError> {
        let limit = self.settings().wait_timeout;
        self.bounded(key, limit, self.rule_wait(key, rule_id)).await
    }

    pub async fn wait_for_rule_within(
        &self,
        key: &ResourceTypeKey,
        rule_id: RuleId,
        limit: Duration,
    ) -> Result<OrderRule, ReorderError> {
        self.bounded(key, Some(limit), self.rule_wait(key, rule_id))
            .await
    }

    async fn cycle_wait(&self, key: &ResourceTypeKey) -> Result<(), ReorderError> {
        let Some(cycle) = self.inner.registry.get(key) else {
            return Ok(());
        };
        let generation = gate::wait_for_cycle(&cycle).await?;
        debug!(%key, generation, "reorder wait released");
        Ok(())
    }

    async fn rule_wait(
        &self,
        key: &ResourceTypeKey,
        rule_id: RuleId,
    ) -> Result<OrderRule, ReorderError> {
        let Some(cycle) = self.inner.registry.get(key) else {
            return Err(ReorderError::UnknownRule {
                key: key.clone(),
                rule_id,
            });
        };
        gate::wait_for_rule(&cycle, rule_id).await
    }

    async fn bounded<T, F>(
        &self,
        key: &ResourceTypeKey,
        limit: Option<Duration>,
        fut: F,
    ) -> Result<T, ReorderError>
    where
        F: Future<Output = Result<T, ReorderError>>,
    {
        match limit {
            None => fut.await,
            Some(waited) => match tokio::time::timeout(waited, fut).await {
                Ok(r) => r,
                Err(_) => Err(ReorderError::WaitTimeout {
                    key: key.clone(),
                    waited,
                }),
            },
        }
    }

    /// Most recent cycle report for `key`.
    pub fn last_report(&self, key: &ResourceTypeKey) -> Option<CycleReport> {
        self.inner.registry.get(key).and_then(|c| c.last_report())
    }

    pub fn stats(&self, key: &ResourceTypeKey) -> Option<KeyStats> {
        self.inner.registry.get(key).map(|c| c.stats())
    }

    /// Keys with live cycle state, sorted.
    pub fn keys(&self) -> Vec<ResourceTypeKey> {
        self.inner.registry.keys()
    }

    /// Drop every key's state, stop its ticker, wake its waiters with
    /// `EngineReset`, and restore the construction-time settings.
    ///
    /// Intended for test isolation.
    pub fn reset(&self) {
        let cleared = self.inner.registry.clear();
        *self
            .inner
            .settings
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = self.inner.defaults.clone();
        info!(keys = cleared, "reorder engine reset");
    }
}
