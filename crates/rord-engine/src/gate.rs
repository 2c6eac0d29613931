//! Completion gate.
//!
//! Two ways to wait on a key's reconciliation:
//!
//! 1. **Key wait** (`wait_for_cycle`): resolves once the cycle covering every
//!    rule already marked done (or already in flight) has completed. Returns
//!    immediately when nothing is outstanding. This is a *happened-before*
//!    signal, not a success signal.
//!
//! 2. **Rule wait** (`wait_for_rule`): resolves with that rule's own outcome,
//!    `Ok(applied order)` or the error recorded by the reconciler.
//!
//! Both fail with `EngineReset` if the key is closed while waiting.

use tokio::sync::watch;

use crate::error::ReorderError;
use crate::registry::{GateState, KeyCycle, RulePoll};
use crate::types::{OrderRule, RuleId};

/// Wait for the covering cycle. Returns the completed generation observed.
pub(crate) async fn wait_for_cycle(cycle: &KeyCycle) -> Result<u64, ReorderError> {
    let (rx, target) = cycle.reorder_target();
    let state = wait_until(rx, target).await;
    match state {
        Some(g) if !g.closed => Ok(g.completed),
        _ => Err(ReorderError::EngineReset {
            key: cycle.key().clone(),
        }),
    }
}

async fn wait_until(mut rx: watch::Receiver<GateState>, target: u64) -> Option<GateState> {
    match rx.wait_for(|g| g.closed || g.completed >= target).await {
        Ok(g) => Some(*g),
        Err(_) => None,
    }
}

/// Wait for `rule_id`'s outcome and take it.
pub(crate) async fn wait_for_rule(
    cycle: &KeyCycle,
    rule_id: RuleId,
) -> Result<OrderRule, ReorderError> {
    loop {
        match cycle.poll_rule(rule_id) {
            RulePoll::Ready(result) => return result,
            RulePoll::Unknown => {
                return Err(ReorderError::UnknownRule {
                    key: cycle.key().clone(),
                    rule_id,
                })
            }
            RulePoll::Closed => {
                return Err(ReorderError::EngineReset {
                    key: cycle.key().clone(),
                })
            }
            RulePoll::Waiting(mut rx) => {
                if rx.changed().await.is_err() {
                    return Err(ReorderError::EngineReset {
                        key: cycle.key().clone(),
                    });
                }
            }
        }
    }
}
