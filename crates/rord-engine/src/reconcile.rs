//! Batch reconciler.
//!
//! `plan_batch` is pure and deterministic: same entries, count and policy
//! always give the same moves in the same sequence. `reconcile` executes a
//! plan against each entry's own [`RuleOrderApi`](crate::RuleOrderApi), one call at a time, lowest
//! target order first, and never stops early: a failed rule is recorded and
//! the next one is attempted.

use tracing::{debug, info, warn};

use crate::error::ReorderError;
use crate::registry::Batch;
use crate::settings::OutOfRangePolicy;
use crate::types::{batch_cmp, OrderRule, ResourceTypeKey, RuleId};

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// One step of a reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlannedMove {
    /// Push `target` for the rule. `clamped_from` carries the requested order
    /// when the bounds policy lowered it.
    Apply {
        rule_id: RuleId,
        target: OrderRule,
        clamped_from: Option<i32>,
    },
    /// No remote call; the rule's outcome is `error`.
    Reject { rule_id: RuleId, error: ReorderError },
}

impl PlannedMove {
    pub fn rule_id(&self) -> RuleId {
        match self {
            PlannedMove::Apply { rule_id, .. } | PlannedMove::Reject { rule_id, .. } => *rule_id,
        }
    }
}

/// Sort by (order, rank, id) and apply the bounds policy.
///
/// `count` is the remote rule count for the resource type; `None` (unknown)
/// or `Some(0)` disables bounds checking.
pub fn plan_batch(
    requests: &[(RuleId, OrderRule)],
    count: Option<u32>,
    policy: OutOfRangePolicy,
) -> Vec<PlannedMove> {
    let mut sorted: Vec<(RuleId, OrderRule)> = requests.to_vec();
    sorted.sort_by(|a, b| batch_cmp((a.0, &a.1), (b.0, &b.1)));

    let bound = count.filter(|c| *c > 0);

    sorted
        .into_iter()
        .map(|(rule_id, desired)| match bound {
            Some(c) if i64::from(desired.order) > i64::from(c) => match policy {
                OutOfRangePolicy::Clamp => PlannedMove::Apply {
                    rule_id,
                    target: desired.with_order(i32::try_from(c).unwrap_or(i32::MAX)),
                    clamped_from: Some(desired.order),
                },
                OutOfRangePolicy::Reject => PlannedMove::Reject {
                    rule_id,
                    error: ReorderError::OrderOutOfRange {
                        rule_id,
                        order: desired.order,
                        count: c,
                    },
                },
            },
            _ => PlannedMove::Apply {
                rule_id,
                target: desired,
                clamped_from: None,
            },
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one reconciliation cycle for one key.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub key: ResourceTypeKey,
    pub generation: u64,
    /// Remote rule count observed at the start of the pass.
    pub count: Option<u32>,
    /// Per-rule results in the order the remote calls were issued.
    pub outcomes: Vec<(RuleId, Result<OrderRule, ReorderError>)>,
}

impl CycleReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    /// `true` when every rule of the batch was applied.
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, rule_id: RuleId) -> Option<&Result<OrderRule, ReorderError>> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == rule_id)
            .map(|(_, r)| r)
    }
}

// ---------------------------------------------------------------------------
// Execute
// ---------------------------------------------------------------------------

/// Run one pass over `batch`. Holds no registry lock.
pub async fn reconcile(batch: Batch, policy: OutOfRangePolicy) -> CycleReport {
    let Batch {
        key,
        generation,
        mut entries,
    } = batch;

    // Batch order up front: the plan then lines up one-to-one with `entries`.
    entries.sort_by(|a, b| batch_cmp((a.rule_id, &a.desired), (b.rule_id, &b.desired)));
    let requests: Vec<(RuleId, OrderRule)> =
        entries.iter().map(|e| (e.rule_id, e.desired)).collect();

    // One count per pass, taken through the first rule in batch order.
    let count = match entries.first() {
        Some(first) => match first.api.rule_count().await {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(%key, generation, error = %e, "rule count unavailable; applying orders unchecked");
                None
            }
        },
        None => None,
    };

    let plan = plan_batch(&requests, count, policy);
    let mut outcomes = Vec::with_capacity(plan.len());

    for (step, entry) in plan.into_iter().zip(&entries) {
        debug_assert_eq!(step.rule_id(), entry.rule_id);
        match step {
            PlannedMove::Reject { rule_id, error } => {
                warn!(%key, generation, %rule_id, error = %error, "reorder rejected");
                outcomes.push((rule_id, Err(error)));
            }
            PlannedMove::Apply {
                rule_id,
                target,
                clamped_from,
            } => {
                if let Some(requested) = clamped_from {
                    warn!(
                        %key,
                        generation,
                        %rule_id,
                        requested,
                        applied = target.order,
                        "order exceeds rule count; clamped"
                    );
                }
                match entry.api.set_order(rule_id, target).await {
                    Ok(()) => {
                        debug!(%key, generation, %rule_id, order = target.order, rank = target.rank, "order applied");
                        outcomes.push((rule_id, Ok(target)));
                    }
                    Err(source) => {
                        warn!(%key, generation, %rule_id, order = target.order, error = %source, "set order failed");
                        outcomes.push((rule_id, Err(ReorderError::Update { rule_id, source })));
                    }
                }
            }
        }
    }

    let report = CycleReport {
        key,
        generation,
        count,
        outcomes,
    };
    info!(
        key = %report.key,
        generation,
        applied = report.applied(),
        failed = report.failed(),
        "reorder cycle complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{FnRuleOrderApi, RuleOrderApi};
    use crate::error::ApiError;
    use crate::registry::PendingEntry;
    use std::sync::{Arc, Mutex};

    fn req(id: i64, order: i32, rank: i32) -> (RuleId, OrderRule) {
        (RuleId(id), OrderRule::new(order, rank))
    }

    fn applied_orders(plan: &[PlannedMove]) -> Vec<(i64, i32)> {
        plan.iter()
            .filter_map(|m| match m {
                PlannedMove::Apply {
                    rule_id, target, ..
                } => Some((rule_id.0, target.order)),
                PlannedMove::Reject { .. } => None,
            })
            .collect()
    }

    #[test]
    fn plan_is_ascending_by_order_with_rank_tie_break() {
        let plan = plan_batch(
            &[req(10, 3, 7), req(11, 1, 7), req(12, 2, 1), req(13, 2, 0)],
            None,
            OutOfRangePolicy::Clamp,
        );
        assert_eq!(
            applied_orders(&plan),
            vec![(11, 1), (13, 2), (12, 2), (10, 3)]
        );
    }

    #[test]
    fn plan_trusts_requested_orders_without_renumbering() {
        let plan = plan_batch(&[req(1, 4, 0), req(2, 9, 0)], Some(20), OutOfRangePolicy::Clamp);
        assert_eq!(applied_orders(&plan), vec![(1, 4), (2, 9)]);
    }

    #[test]
    fn clamp_lowers_out_of_range_order_to_count() {
        let plan = plan_batch(&[req(1, 2, 5), req(2, 9, 5)], Some(4), OutOfRangePolicy::Clamp);
        assert_eq!(
            plan[1],
            PlannedMove::Apply {
                rule_id: RuleId(2),
                target: OrderRule::new(4, 5),
                clamped_from: Some(9),
            }
        );
    }

    #[test]
    fn reject_skips_out_of_range_order() {
        let plan = plan_batch(&[req(1, 2, 0), req(2, 9, 0)], Some(4), OutOfRangePolicy::Reject);
        assert_eq!(applied_orders(&plan), vec![(1, 2)]);
        assert_eq!(
            plan[1],
            PlannedMove::Reject {
                rule_id: RuleId(2),
                error: ReorderError::OrderOutOfRange {
                    rule_id: RuleId(2),
                    order: 9,
                    count: 4,
                },
            }
        );
    }

    #[test]
    fn zero_or_unknown_count_disables_bounds() {
        for count in [None, Some(0)] {
            let plan = plan_batch(&[req(1, 50, 0)], count, OutOfRangePolicy::Reject);
            assert_eq!(applied_orders(&plan), vec![(1, 50)]);
        }
    }

    #[test]
    fn plan_is_deterministic() {
        let input = [req(5, 2, 2), req(3, 2, 2), req(4, 1, 9)];
        let a = plan_batch(&input, Some(3), OutOfRangePolicy::Clamp);
        let b = plan_batch(&input, Some(3), OutOfRangePolicy::Clamp);
        assert_eq!(a, b);
        assert_eq!(
            a.iter().map(PlannedMove::rule_id).collect::<Vec<_>>(),
            vec![RuleId(4), RuleId(3), RuleId(5)]
        );
    }

    #[tokio::test]
    async fn every_entry_gets_an_outcome_in_batch_order() {
        let seen: Arc<Mutex<Vec<RuleId>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let api: Arc<dyn RuleOrderApi> = Arc::new(FnRuleOrderApi::new(
            || async { Err::<u32, ApiError>(ApiError::Transport("down".to_string())) },
            move |id, _order| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().unwrap().push(id);
                    if id == RuleId(2) {
                        Err(ApiError::Api {
                            status: Some(409),
                            message: "conflict".to_string(),
                        })
                    } else {
                        Ok(())
                    }
                }
            },
        ));
        let entry = |id: i64, order: i32| PendingEntry {
            rule_id: RuleId(id),
            desired: OrderRule::new(order, 0),
            done: true,
            api: Arc::clone(&api),
        };
        let batch = Batch {
            key: "k".into(),
            generation: 3,
            entries: vec![entry(3, 3), entry(1, 1), entry(2, 2)],
        };

        let report = reconcile(batch, OutOfRangePolicy::Reject).await;

        assert_eq!(report.count, None);
        assert_eq!(*seen.lock().unwrap(), vec![RuleId(1), RuleId(2), RuleId(3)]);
        let ids: Vec<RuleId> = report.outcomes.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![RuleId(1), RuleId(2), RuleId(3)]);
        assert_eq!(report.applied(), 2);
        assert!(matches!(
            report.outcome(RuleId(2)),
            Some(Err(ReorderError::Update { .. }))
        ));
    }
}
