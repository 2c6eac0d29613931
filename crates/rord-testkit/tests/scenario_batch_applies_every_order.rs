//! Scenario: one batch applies every requested order
//!
//! # Invariants under test
//!
//! 1. Five rules registered under one key with orders 1..5 and rank 7, all
//!    marked done before the first tick, are applied by exactly five
//!    `set_order` calls, one per rule, carrying that rule's order.
//!
//! 2. Calls go out lowest order first, so the remote list ends up in the
//!    requested order even though every call shifts its neighbours.
//!
//! 3. After `wait_for_reorder` returns, each rule's remote position equals
//!    its registered order.
//!
//! All tests are pure in-process; no network required.

use std::sync::Arc;

use rord_engine::{OrderRule, ResourceTypeKey, RuleId, RuleOrderApi};
use rord_testkit::{test_engine, FakeRuleApi};

#[tokio::test]
async fn five_rules_one_key_one_cycle() {
    let engine = test_engine().unwrap();
    let api = Arc::new(FakeRuleApi::new());
    let key = ResourceTypeKey::new("k");

    // Created in reverse so every rule starts out of place.
    let ids: Vec<RuleId> = (1..=5).map(|i| RuleId(100 + i)).collect();
    for (i, id) in ids.iter().enumerate().rev() {
        let order = OrderRule::new(i as i32 + 1, 7);
        let dyn_api: Arc<dyn RuleOrderApi> = api.clone();
        engine.register(&key, *id, order, dyn_api).unwrap();
        api.create_rule(*id, "fw");
    }
    for id in &ids {
        assert!(engine.mark_done(&key, *id));
    }

    engine.wait_for_reorder(&key).await.unwrap();

    let calls = api.update_calls();
    assert_eq!(calls.len(), 5, "exactly one set_order per rule");
    for (i, call) in calls.iter().enumerate() {
        assert_eq!(call.rule_id, ids[i], "call {i} targets the rule registered for order {}", i + 1);
        assert_eq!(call.order, OrderRule::new(i as i32 + 1, 7));
    }

    for (i, id) in ids.iter().enumerate() {
        assert_eq!(
            api.position_of(*id),
            Some(i as i32 + 1),
            "rule {id} must sit at its registered order"
        );
    }

    let report = engine.last_report(&key).unwrap();
    assert_eq!(report.generation, 1);
    assert_eq!(report.count, Some(5));
    assert!(report.is_clean());
}

#[tokio::test]
async fn rank_breaks_ties_between_equal_orders() {
    let engine = test_engine().unwrap();
    let api = Arc::new(FakeRuleApi::new());
    let key = ResourceTypeKey::new("tie");

    let requests = [(1, OrderRule::new(1, 5)), (2, OrderRule::new(1, 0))];
    for (id, order) in requests {
        let dyn_api: Arc<dyn RuleOrderApi> = api.clone();
        engine.register(&key, RuleId(id), order, dyn_api).unwrap();
        api.create_rule(RuleId(id), "tie");
        engine.mark_done(&key, RuleId(id));
    }

    engine.wait_for_reorder(&key).await.unwrap();

    let sequence: Vec<RuleId> = api.update_calls().iter().map(|c| c.rule_id).collect();
    assert_eq!(
        sequence,
        vec![RuleId(2), RuleId(1)],
        "lower rank is applied first"
    );
}

#[tokio::test]
async fn wait_returns_immediately_when_nothing_is_outstanding() {
    let engine = test_engine().unwrap();
    let key = ResourceTypeKey::new("idle");

    // Unknown key: nothing to wait for.
    tokio::time::timeout(std::time::Duration::from_millis(20), engine.wait_for_reorder(&key))
        .await
        .expect("wait on an unknown key must not block")
        .unwrap();

    assert!(engine.stats(&key).is_none(), "waiting must not create key state");
}
