use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReorderError;

/// Production tick interval: long enough to batch a burst of near-simultaneous
/// resource operations into one remote reordering pass.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);

/// Cycles an uncollected per-rule outcome survives before it is pruned.
pub const DEFAULT_OUTCOME_RETENTION_CYCLES: u64 = 16;

/// What to do with a rule whose `order` exceeds the remote rule count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfRangePolicy {
    /// Apply `count` instead (the rule lands last).
    Clamp,
    /// Skip the remote call and record `OrderOutOfRange`.
    Reject,
}

impl OutOfRangePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutOfRangePolicy::Clamp => "clamp",
            OutOfRangePolicy::Reject => "reject",
        }
    }
}

/// Tunables for a [`ReorderEngine`](crate::ReorderEngine).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub tick_interval: Duration,
    /// Consecutive ticks the pending set must stay the same size before a
    /// cycle runs. `0` runs on every tick.
    pub settle_ticks: u32,
    /// Default bound for `wait_for_*`. `None` waits forever.
    pub wait_timeout: Option<Duration>,
    pub out_of_range: OutOfRangePolicy,
    pub outcome_retention_cycles: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            settle_ticks: 0,
            wait_timeout: None,
            out_of_range: OutOfRangePolicy::Clamp,
            outcome_retention_cycles: DEFAULT_OUTCOME_RETENTION_CYCLES,
        }
    }
}

impl EngineSettings {
    /// Short interval used by scenario tests.
    pub fn for_test(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            ..Self::default()
        }
    }

    /// Reject values the engine cannot run with.
    ///
    /// - `tick_interval` must be non-zero (a zero period stops the ticker).
    /// - `outcome_retention_cycles` must be > 0 (0 prunes every outcome in
    ///   the cycle that records it).
    pub fn validate(&self) -> Result<(), ReorderError> {
        if self.tick_interval.is_zero() {
            return Err(ReorderError::InvalidSettings {
                message: "tick_interval must be > 0".to_string(),
            });
        }
        if self.outcome_retention_cycles == 0 {
            return Err(ReorderError::InvalidSettings {
                message: "outcome_retention_cycles must be > 0".to_string(),
            });
        }
        Ok(())
    }

    /// Build from canonical config JSON (produced by rord-config).
    ///
    /// All fields are optional:
    /// - reorder.tick_interval_ms (default 30000, must be > 0)
    /// - reorder.settle_ticks (default 0)
    /// - reorder.wait_timeout_ms (absent = wait forever)
    /// - reorder.out_of_range ("clamp" | "reject", default "clamp")
    /// - reorder.outcome_retention_cycles (default 16, must be > 0)
    pub fn from_config_json(cfg: &Value) -> Result<Self> {
        let mut s = Self::default();

        if let Some(ms) = read_u64(cfg, "/reorder/tick_interval_ms")? {
            if ms == 0 {
                bail!("reorder.tick_interval_ms must be > 0");
            }
            s.tick_interval = Duration::from_millis(ms);
        }

        if let Some(n) = read_u64(cfg, "/reorder/settle_ticks")? {
            s.settle_ticks = u32::try_from(n)
                .map_err(|_| anyhow::anyhow!("reorder.settle_ticks too large: {n}"))?;
        }

        if let Some(ms) = read_u64(cfg, "/reorder/wait_timeout_ms")? {
            s.wait_timeout = Some(Duration::from_millis(ms));
        }

        match cfg.pointer("/reorder/out_of_range") {
            None | Some(Value::Null) => {}
            Some(Value::String(p)) => {
                s.out_of_range = match p.trim().to_ascii_lowercase().as_str() {
                    "clamp" => OutOfRangePolicy::Clamp,
                    "reject" => OutOfRangePolicy::Reject,
                    other => bail!("reorder.out_of_range must be 'clamp' or 'reject' (got '{other}')"),
                };
            }
            Some(other) => bail!("reorder.out_of_range must be a string (got {other})"),
        }

        if let Some(n) = read_u64(cfg, "/reorder/outcome_retention_cycles")? {
            if n == 0 {
                bail!("reorder.outcome_retention_cycles must be > 0");
            }
            s.outcome_retention_cycles = n;
        }

        s.validate()?;
        Ok(s)
    }
}

fn read_u64(cfg: &Value, ptr: &str) -> Result<Option<u64>> {
    match cfg.pointer(ptr) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) => Ok(Some(n)),
            None => bail!("{ptr} must be a non-negative integer (got {v})"),
        },
    }
}
