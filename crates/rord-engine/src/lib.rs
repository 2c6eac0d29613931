//! rord-engine
//!
//! Rule-order reconciliation engine.
//!
//! The remote configuration API can only "set the absolute order of rule X",
//! one rule at a time, while the host orchestrator creates and updates many
//! rules concurrently. This crate coalesces those requests per resource-type
//! key into periodic batched passes and lets each caller block until its own
//! rule has been repositioned.
//!
//! Architectural decisions:
//! - One ticker task per key; passes for a key never overlap
//! - Only rules marked done are picked up; the rest wait for a later tick
//! - Within a pass, remote calls go lowest target order first
//! - A failed rule never aborts its batch; its error is kept for the caller
//! - No registry lock is held across a remote call

mod api;
mod engine;
mod error;
mod gate;
mod reconcile;
mod registry;
mod scheduler;
mod settings;
mod types;

pub use api::{FnRuleOrderApi, RuleOrderApi};
pub use engine::ReorderEngine;
pub use error::{ApiError, ReorderError};
pub use reconcile::{plan_batch, CycleReport, PlannedMove};
pub use registry::KeyStats;
pub use settings::{
    EngineSettings, OutOfRangePolicy, DEFAULT_OUTCOME_RETENTION_CYCLES, DEFAULT_TICK_INTERVAL,
};
pub use types::{OrderRule, ResourceTypeKey, RuleId};
