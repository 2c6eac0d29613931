//! Scenario: engine entry points outside the happy path
//!
//! # Invariants under test
//!
//! 1. Registration rejects `order < 1` and any before-reorder hook error;
//!    neither leaves an entry behind.
//!
//! 2. `mark_done` for an unregistered rule is ignored.
//!
//! 3. Bounded waits fail with `WaitTimeout` when no cycle completes in time,
//!    both via the explicit bound and via `EngineSettings::wait_timeout`.
//!
//! 4. `reset` wakes blocked waiters with `EngineReset`, drops every key and
//!    restores the construction-time tick interval.
//!
//! 5. Construction outside a Tokio runtime fails with `NoRuntime`.
//!
//! 6. Settings the engine cannot run with (zero tick interval, zero outcome
//!    retention) are refused up front with `InvalidSettings`, both at
//!    construction and through `set_tick_interval`; a refused override
//!    leaves the previous interval in place and later registrations still
//!    complete.
//!
//! 7. A before-reorder hook can bound-check against a rule count the caller
//!    fetched before registering.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;

use rord_engine::{
    ApiError, EngineSettings, FnRuleOrderApi, OrderRule, ReorderEngine, ReorderError,
    ResourceTypeKey, RuleId, RuleOrderApi, DEFAULT_TICK_INTERVAL,
};

type Calls = Arc<Mutex<Vec<(RuleId, OrderRule)>>>;

fn recording_api(count: u32) -> (Arc<dyn RuleOrderApi>, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let api = FnRuleOrderApi::new(
        move || async move { Ok::<u32, ApiError>(count) },
        move |id, order| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push((id, order));
                Ok::<(), ApiError>(())
            }
        },
    );
    (Arc::new(api), calls)
}

#[tokio::test]
async fn zero_order_is_rejected_at_registration() {
    let engine = ReorderEngine::new(EngineSettings::default()).unwrap();
    let key = ResourceTypeKey::new("k");
    let (api, _) = recording_api(10);

    let err = engine
        .register(&key, RuleId(1), OrderRule::new(0, 0), api)
        .unwrap_err();
    assert_eq!(
        err,
        ReorderError::InvalidOrder {
            rule_id: RuleId(1),
            order: 0
        }
    );
    assert!(engine.keys().is_empty());
}

#[tokio::test]
async fn hook_error_rejects_registration() {
    let engine = ReorderEngine::new(EngineSettings::default()).unwrap();
    let key = ResourceTypeKey::new("k");
    let (api, _) = recording_api(3);

    let err = engine
        .register_with_hook(&key, RuleId(7), OrderRule::new(5, 0), api.clone(), |_, o| {
            if o.order > 3 {
                Err(format!("order {} beyond 3 rules", o.order))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
    assert!(matches!(err, ReorderError::Hook { rule_id: RuleId(7), .. }));
    assert!(err.to_string().contains("beyond 3 rules"));
    assert!(!engine.mark_done(&key, RuleId(7)));

    let mut hook_ran = false;
    engine
        .register_with_hook(&key, RuleId(8), OrderRule::new(2, 0), api, |_, _| {
            hook_ran = true;
            Ok::<(), String>(())
        })
        .unwrap();
    assert!(hook_ran, "hook runs synchronously during registration");
    assert_eq!(engine.stats(&key).unwrap().pending, 1);
}

#[tokio::test]
async fn mark_done_unknown_rule_is_ignored() {
    let engine = ReorderEngine::new(EngineSettings::default()).unwrap();
    let key = ResourceTypeKey::new("k");
    assert!(!engine.mark_done(&key, RuleId(1)));

    let (api, _) = recording_api(1);
    engine
        .register(&key, RuleId(1), OrderRule::new(1, 0), api)
        .unwrap();
    assert!(!engine.mark_done(&key, RuleId(2)));
    assert_eq!(engine.stats(&key).unwrap().pending_done, 0);
}

#[tokio::test]
async fn bounded_waits_time_out() {
    // Default 30s tick: nothing completes within the bounds below.
    let engine = ReorderEngine::new(EngineSettings {
        wait_timeout: Some(Duration::from_millis(30)),
        ..EngineSettings::default()
    })
    .unwrap();
    let key = ResourceTypeKey::new("slow");
    let (api, calls) = recording_api(1);
    engine
        .register(&key, RuleId(1), OrderRule::new(1, 0), api)
        .unwrap();
    engine.mark_done(&key, RuleId(1));

    let err = engine
        .wait_for_reorder_within(&key, Duration::from_millis(30))
        .await
        .unwrap_err();
    assert!(matches!(err, ReorderError::WaitTimeout { .. }));

    let err = engine.wait_for_rule(&key, RuleId(1)).await.unwrap_err();
    assert_eq!(
        err,
        ReorderError::WaitTimeout {
            key: key.clone(),
            waited: Duration::from_millis(30)
        }
    );
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reset_wakes_waiters_and_restores_defaults() {
    let engine = ReorderEngine::new(EngineSettings::default()).unwrap();
    let key = ResourceTypeKey::new("reset");
    engine.set_tick_interval(Duration::from_secs(60)).unwrap();
    assert_eq!(engine.settings().tick_interval, Duration::from_secs(60));

    let (api, _) = recording_api(1);
    engine
        .register(&key, RuleId(1), OrderRule::new(1, 0), api)
        .unwrap();
    engine.mark_done(&key, RuleId(1));

    let waiter = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.wait_for_rule(&key, RuleId(1)).await })
    };
    let key_waiter = {
        let engine = engine.clone();
        let key = key.clone();
        tokio::spawn(async move { engine.wait_for_reorder(&key).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    engine.reset();

    assert_eq!(
        waiter.await.unwrap(),
        Err(ReorderError::EngineReset { key: key.clone() })
    );
    assert_eq!(
        key_waiter.await.unwrap(),
        Err(ReorderError::EngineReset { key: key.clone() })
    );
    assert!(engine.keys().is_empty());
    assert_eq!(engine.settings().tick_interval, DEFAULT_TICK_INTERVAL);
}

#[tokio::test]
async fn tick_interval_override_applies_to_new_keys() {
    let engine = ReorderEngine::new(EngineSettings::default()).unwrap();
    engine.set_tick_interval(Duration::from_millis(50)).unwrap();
    let key = ResourceTypeKey::new("fast");
    let (api, calls) = recording_api(2);

    for id in [2, 1] {
        engine
            .register(&key, RuleId(id), OrderRule::new(id as i32, 4), api.clone())
            .unwrap();
        engine.mark_done(&key, RuleId(id));
    }

    engine
        .wait_for_reorder_within(&key, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            (RuleId(1), OrderRule::new(1, 4)),
            (RuleId(2), OrderRule::new(2, 4)),
        ]
    );
}

#[test]
fn construction_outside_runtime_fails() {
    let err = ReorderEngine::new(EngineSettings::default()).unwrap_err();
    assert_eq!(err, ReorderError::NoRuntime);
}

#[tokio::test]
async fn zero_tick_interval_is_refused_and_engine_keeps_working() {
    let engine = ReorderEngine::new(EngineSettings::for_test(Duration::from_millis(50))).unwrap();

    let err = engine.set_tick_interval(Duration::ZERO).unwrap_err();
    assert!(matches!(err, ReorderError::InvalidSettings { .. }));
    assert_eq!(engine.settings().tick_interval, Duration::from_millis(50));

    let key = ResourceTypeKey::new("after-zero");
    let (api, calls) = recording_api(1);
    engine
        .register(&key, RuleId(1), OrderRule::new(1, 0), api)
        .unwrap();
    engine.mark_done(&key, RuleId(1));

    engine
        .wait_for_reorder_within(&key, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unusable_settings_are_refused_at_construction() {
    let zero_tick = EngineSettings::for_test(Duration::ZERO);
    assert!(matches!(
        ReorderEngine::new(zero_tick.clone()),
        Err(ReorderError::InvalidSettings { .. })
    ));
    assert!(matches!(
        ReorderEngine::with_runtime(zero_tick, Handle::current()),
        Err(ReorderError::InvalidSettings { .. })
    ));

    let zero_retention = EngineSettings {
        outcome_retention_cycles: 0,
        ..EngineSettings::for_test(Duration::from_millis(50))
    };
    let err = ReorderEngine::new(zero_retention).unwrap_err();
    assert!(err.to_string().contains("outcome_retention_cycles"));
}

#[tokio::test]
async fn failed_outcome_survives_with_minimum_retention() {
    let engine = ReorderEngine::new(EngineSettings {
        outcome_retention_cycles: 1,
        ..EngineSettings::for_test(Duration::from_millis(50))
    })
    .unwrap();
    let key = ResourceTypeKey::new("retain");
    let api: Arc<dyn RuleOrderApi> = Arc::new(FnRuleOrderApi::new(
        || async { Ok::<u32, ApiError>(1) },
        |_id, _order| async {
            Err::<(), ApiError>(ApiError::Api {
                status: Some(500),
                message: "boom".to_string(),
            })
        },
    ));
    engine
        .register(&key, RuleId(1), OrderRule::new(1, 0), api)
        .unwrap();
    engine.mark_done(&key, RuleId(1));

    engine
        .wait_for_reorder_within(&key, Duration::from_secs(2))
        .await
        .unwrap();
    let err = engine.wait_for_rule(&key, RuleId(1)).await.unwrap_err();
    assert!(matches!(err, ReorderError::Update { rule_id: RuleId(1), .. }));
}

#[tokio::test]
async fn hook_bounds_check_uses_prefetched_count() {
    let engine = ReorderEngine::new(EngineSettings::default()).unwrap();
    let key = ResourceTypeKey::new("bounded");
    let (api, _) = recording_api(3);

    let count = api.rule_count().await.unwrap();
    let bounds = |_: RuleId, o: OrderRule| {
        if o.order as i64 > i64::from(count) {
            Err(format!("order {} beyond {count} rules", o.order))
        } else {
            Ok(())
        }
    };

    let err = engine
        .register_with_hook(&key, RuleId(1), OrderRule::new(4, 0), api.clone(), bounds)
        .unwrap_err();
    assert!(err.to_string().contains("beyond 3 rules"));
    engine
        .register_with_hook(&key, RuleId(2), OrderRule::new(3, 0), api, bounds)
        .unwrap();
    assert_eq!(engine.stats(&key).unwrap().pending, 1);
}
