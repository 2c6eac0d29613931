//! rord-testkit
//!
//! Test doubles for the reorder engine: an in-memory remote rule API with
//! list-shift semantics, and a driver for the provider-side create/update
//! lifecycle. Scenario tests for the engine's end-to-end guarantees live in
//! this crate's `tests/` directory.

pub mod fake_api;
pub mod lifecycle;

pub use fake_api::{ApiEvent, FakeRuleApi, RemoteRule, UpdateCall};
pub use lifecycle::{LifecycleResult, RuleLifecycle};

use std::time::Duration;

use rord_engine::{EngineSettings, ReorderEngine, ReorderError};

/// Tick interval the scenarios run with.
pub const TEST_TICK: Duration = Duration::from_millis(100);

/// Engine on the current runtime with [`TEST_TICK`].
pub fn test_engine() -> Result<ReorderEngine, ReorderError> {
    ReorderEngine::new(EngineSettings::for_test(TEST_TICK))
}
