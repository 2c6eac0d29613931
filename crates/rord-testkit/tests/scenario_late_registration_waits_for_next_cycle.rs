//! Scenario: cycle isolation
//!
//! # Invariants under test
//!
//! 1. A rule registered but not yet marked done when a tick fires stays
//!    queued; it is not part of that cycle.
//!
//! 2. A rule registered and marked done while a cycle is already in flight
//!    is processed by the following cycle, and waiting on it does not
//!    return when the in-flight cycle completes.
//!
//! 3. Rules split across cycles still end at their registered orders.

use std::sync::Arc;
use std::time::Duration;

use rord_engine::{OrderRule, ReorderEngine, ResourceTypeKey, RuleId, RuleOrderApi};
use rord_testkit::{test_engine, FakeRuleApi};

fn register_done(
    engine: &ReorderEngine,
    api: &Arc<FakeRuleApi>,
    key: &ResourceTypeKey,
    id: i64,
    order: i32,
) {
    let dyn_api: Arc<dyn RuleOrderApi> = api.clone();
    engine
        .register(key, RuleId(id), OrderRule::new(order, 0), dyn_api)
        .unwrap();
    api.create_rule(RuleId(id), "iso");
    engine.mark_done(key, RuleId(id));
}

#[tokio::test]
async fn not_done_rule_is_left_for_a_later_tick() {
    let engine = test_engine().unwrap();
    let api = Arc::new(FakeRuleApi::new());
    let key = ResourceTypeKey::new("iso");

    for (id, order) in [(1, 1), (2, 2), (3, 3)] {
        register_done(&engine, &api, &key, id, order);
    }
    // Registered, own write still "running": not done.
    let dyn_api: Arc<dyn RuleOrderApi> = api.clone();
    engine
        .register(&key, RuleId(4), OrderRule::new(4, 0), dyn_api)
        .unwrap();

    engine.wait_for_reorder(&key).await.unwrap();

    assert!(api.update_calls_for(RuleId(4)).is_empty());
    let stats = engine.stats(&key).unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.pending_done, 0);
    assert_eq!(stats.cycles_completed, 1);

    api.create_rule(RuleId(4), "iso");
    engine.mark_done(&key, RuleId(4));
    register_done(&engine, &api, &key, 5, 5);
    engine.wait_for_reorder(&key).await.unwrap();

    let report = engine.last_report(&key).unwrap();
    assert_eq!(report.generation, 2);
    let ids: Vec<RuleId> = report.outcomes.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![RuleId(4), RuleId(5)]);

    for id in 1..=5 {
        assert_eq!(api.position_of(RuleId(id)), Some(id as i32));
    }
}

#[tokio::test]
async fn rule_arriving_mid_cycle_waits_for_the_next_one() {
    let engine = test_engine().unwrap();
    let api = Arc::new(FakeRuleApi::with_latency(Duration::from_millis(40)));
    let key = ResourceTypeKey::new("mid");

    for (id, order) in [(1, 1), (2, 2), (3, 3)] {
        register_done(&engine, &api, &key, id, order);
    }

    // Wait until the first cycle took its snapshot.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if engine.stats(&key).map(|s| s.in_flight).unwrap_or(0) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("first cycle must start");

    register_done(&engine, &api, &key, 4, 4);
    let applied = engine.wait_for_rule(&key, RuleId(4)).await.unwrap();
    assert_eq!(applied, OrderRule::new(4, 0));

    let stats = engine.stats(&key).unwrap();
    assert_eq!(stats.cycles_completed, 2, "late rule needed a second cycle");

    let calls = api.update_calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[3].rule_id, RuleId(4), "late rule is applied after the first batch");
    assert_eq!(engine.last_report(&key).unwrap().outcomes.len(), 1);
}
