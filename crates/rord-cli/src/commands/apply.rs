//! `rord apply`: push a reorder plan through the engine.
//!
//! Every rule of the plan is registered and marked done up front, so the
//! whole plan lands in one batch (given a settle window, in as few batches
//! as the tick allows). Each rule's own outcome is then collected.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rord_client::{ClientSettings, HttpRuleOrderApi};
use rord_config::{report_unused_keys, UnusedKeyPolicy};
use rord_engine::{
    EngineSettings, OrderRule, ReorderEngine, ResourceTypeKey, RuleId, RuleOrderApi,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::read_text;

pub struct ApplyArgs {
    pub config_paths: Vec<String>,
    pub plan_path: String,
    pub tick_interval_ms: Option<u64>,
    pub strict_config: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    /// REST collection the rules live in.
    pub collection: String,
    /// Registry key; defaults to the collection name.
    #[serde(default)]
    pub key: Option<String>,
    pub rules: Vec<PlanRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRule {
    pub id: i64,
    pub order: i32,
    #[serde(default)]
    pub rank: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleSummary {
    pub id: i64,
    pub requested_order: i32,
    pub rank: i32,
    /// "applied" | "failed"
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplySummary {
    pub config_hash: String,
    pub collection: String,
    pub key: String,
    pub applied: usize,
    pub failed: usize,
    pub rules: Vec<RuleSummary>,
}

pub fn parse_plan(raw: &str) -> Result<Plan> {
    let plan: Plan = serde_yaml::from_str(raw).context("plan must be valid YAML")?;
    if plan.collection.trim().is_empty() {
        bail!("plan.collection must not be empty");
    }
    if plan.rules.is_empty() {
        bail!("plan.rules must not be empty");
    }
    let mut seen = std::collections::BTreeSet::new();
    for r in &plan.rules {
        if !seen.insert(r.id) {
            bail!("plan.rules lists rule {} more than once", r.id);
        }
    }
    Ok(plan)
}

pub async fn run_apply(args: ApplyArgs) -> Result<ApplySummary> {
    let loaded = rord_config::load_layered_yaml(&args.config_paths)?;
    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let unused = report_unused_keys(&loaded.config_json, policy)?;
    for ptr in &unused.unused_leaf_pointers {
        warn!(pointer = %ptr, "config key is not read by anything");
    }

    let engine_settings = EngineSettings::from_config_json(&loaded.config_json)
        .context("invalid reorder config")?;
    let client_settings =
        ClientSettings::from_config_json(&loaded.config_json).context("invalid api config")?;

    let plan = parse_plan(&read_text(&args.plan_path)?)
        .with_context(|| format!("invalid plan: {}", args.plan_path))?;

    let api: Arc<dyn RuleOrderApi> =
        Arc::new(HttpRuleOrderApi::new(&client_settings, plan.collection.clone())?);
    let engine = ReorderEngine::new(engine_settings)?;
    if let Some(ms) = args.tick_interval_ms {
        engine
            .set_tick_interval(Duration::from_millis(ms))
            .context("invalid --tick-interval-ms")?;
    }

    let key = ResourceTypeKey::new(plan.key.clone().unwrap_or_else(|| plan.collection.clone()));
    info!(
        %key,
        collection = %plan.collection,
        rules = plan.rules.len(),
        config_hash = %loaded.config_hash,
        "applying reorder plan"
    );

    // Registration failures are final; only registered rules are waited on.
    let mut registered: Vec<Result<(), String>> = Vec::with_capacity(plan.rules.len());
    for r in &plan.rules {
        let reg = engine
            .register(&key, RuleId(r.id), OrderRule::new(r.order, r.rank), api.clone())
            .map_err(|e| e.to_string());
        if reg.is_ok() {
            engine.mark_done(&key, RuleId(r.id));
        }
        registered.push(reg);
    }

    let mut rules = Vec::with_capacity(plan.rules.len());
    for (r, reg) in plan.rules.iter().zip(registered) {
        let outcome = match reg {
            Err(e) => Err(e),
            Ok(()) => engine
                .wait_for_rule(&key, RuleId(r.id))
                .await
                .map_err(|e| e.to_string()),
        };
        let summary = match outcome {
            Ok(applied) => RuleSummary {
                id: r.id,
                requested_order: r.order,
                rank: r.rank,
                status: "applied",
                applied_order: Some(applied.order),
                error: None,
            },
            Err(e) => {
                warn!(%key, rule_id = r.id, error = %e, "rule not reordered");
                RuleSummary {
                    id: r.id,
                    requested_order: r.order,
                    rank: r.rank,
                    status: "failed",
                    applied_order: None,
                    error: Some(e),
                }
            }
        };
        rules.push(summary);
    }

    let failed = rules.iter().filter(|r| r.status == "failed").count();
    Ok(ApplySummary {
        config_hash: loaded.config_hash,
        collection: plan.collection,
        key: key.to_string(),
        applied: rules.len() - failed,
        failed,
        rules,
    })
}
