//! Per-key ticker.
//!
//! Each resource-type key gets one background task. On every tick it asks
//! the key's book for a batch and, if there is one, runs the reconciler to
//! completion before the next tick is awaited, so passes for one key never
//! overlap.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::reconcile;
use crate::registry::KeyCycle;

/// Spawn the ticker for `cycle` on `runtime`.
///
/// The first tick fires one full interval after arming. Missed ticks (a pass
/// that outlasted the interval) are delayed rather than bursted.
pub(crate) fn spawn_ticker(runtime: &Handle, cycle: Arc<KeyCycle>) -> JoinHandle<()> {
    let interval = cycle.settings().tick_interval;
    let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
    info!(key = %cycle.key(), interval_ms, "reorder ticker armed");

    runtime.spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_cycle(&cycle).await;
        }
    })
}

/// One tick: snapshot, reconcile, publish.
pub(crate) async fn run_cycle(cycle: &KeyCycle) {
    let Some(batch) = cycle.begin_cycle() else {
        return;
    };
    debug!(
        key = %batch.key,
        generation = batch.generation,
        rules = batch.entries.len(),
        "reorder cycle started"
    );
    let report = reconcile::reconcile(batch, cycle.settings().out_of_range).await;
    cycle.finish_cycle(report);
}
