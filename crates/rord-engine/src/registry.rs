//! Pending-reposition registry.
//!
//! One [`KeyCycle`] per resource-type key holds the book-keeping for that key:
//! pending entries, the ids of the batch in flight, uncollected per-rule
//! outcomes and the cycle generation counters. The completion gate is a
//! `watch` channel owned by the same struct.
//!
//! # Invariants
//!
//! - An entry sits in `pending` from registration until a cycle snapshots it;
//!   from then until the cycle finishes its id sits in `in_flight`.
//! - `completed <= started`, and `started - completed <= 1` (one pass in
//!   flight per key).
//! - Every gate publication happens with the book lock held, so a receiver
//!   subscribed under the same lock cannot miss a completion.
//! - Locks guard map book-keeping only. Nothing here awaits.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::RuleOrderApi;
use crate::error::ReorderError;
use crate::reconcile::CycleReport;
use crate::settings::EngineSettings;
use crate::types::{OrderRule, ResourceTypeKey, RuleId};

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// One registered reposition request.
#[derive(Clone)]
pub struct PendingEntry {
    pub rule_id: RuleId,
    pub desired: OrderRule,
    /// Set by the registrant once its own remote write finished.
    pub done: bool,
    pub api: Arc<dyn RuleOrderApi>,
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("rule_id", &self.rule_id)
            .field("desired", &self.desired)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Result of a processed rule, kept until its registrant collects it.
#[derive(Clone, Debug)]
pub struct RuleOutcome {
    pub generation: u64,
    pub result: Result<OrderRule, ReorderError>,
}

/// Published on the per-key gate after every completed cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GateState {
    pub completed: u64,
    pub closed: bool,
}

/// Entries handed from the scheduler to the reconciler.
#[derive(Debug)]
pub struct Batch {
    pub key: ResourceTypeKey,
    pub generation: u64,
    pub entries: Vec<PendingEntry>,
}

/// Point-in-time counters for one key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyStats {
    pub pending: usize,
    pub pending_done: usize,
    pub in_flight: usize,
    pub uncollected_outcomes: usize,
    pub cycles_started: u64,
    pub cycles_completed: u64,
}

// ---------------------------------------------------------------------------
// KeyCycle
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CycleBook {
    pending: BTreeMap<RuleId, PendingEntry>,
    in_flight: BTreeSet<RuleId>,
    outcomes: HashMap<RuleId, RuleOutcome>,
    started: u64,
    completed: u64,
    last_len: usize,
    quiet_ticks: u32,
    last_report: Option<CycleReport>,
    closed: bool,
}

/// What [`KeyCycle::poll_rule`] found for a rule.
pub(crate) enum RulePoll {
    Ready(Result<OrderRule, ReorderError>),
    Waiting(watch::Receiver<GateState>),
    Unknown,
    Closed,
}

pub(crate) struct KeyCycle {
    key: ResourceTypeKey,
    settings: EngineSettings,
    book: Mutex<CycleBook>,
    gate: watch::Sender<GateState>,
}

impl KeyCycle {
    pub(crate) fn new(key: ResourceTypeKey, settings: EngineSettings) -> Self {
        let (gate, _rx) = watch::channel(GateState {
            completed: 0,
            closed: false,
        });
        Self {
            key,
            settings,
            book: Mutex::new(CycleBook::default()),
            gate,
        }
    }

    pub(crate) fn key(&self) -> &ResourceTypeKey {
        &self.key
    }

    pub(crate) fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn lock(&self) -> MutexGuard<'_, CycleBook> {
        // Book-keeping is consistent at every unlock; a panicking holder
        // cannot leave it half-written.
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the entry for `entry.rule_id` (done = false).
    /// `false` when the key was already closed; nothing is stored then.
    pub(crate) fn insert(&self, mut entry: PendingEntry) -> bool {
        entry.done = false;
        let mut book = self.lock();
        if book.closed {
            return false;
        }
        // A fresh registration supersedes anything recorded for the rule.
        book.outcomes.remove(&entry.rule_id);
        book.pending.insert(entry.rule_id, entry);
        true
    }

    /// Flag a pending entry as ready. `false` when nothing is registered.
    pub(crate) fn mark_done(&self, rule_id: RuleId) -> bool {
        let mut book = self.lock();
        match book.pending.get_mut(&rule_id) {
            Some(e) => {
                e.done = true;
                true
            }
            None => false,
        }
    }

    /// Snapshot and remove every done entry, opening a new generation.
    ///
    /// `None` when there is nothing to do, a pass is already in flight, the
    /// settle window has not elapsed, or the key was closed.
    pub(crate) fn begin_cycle(&self) -> Option<Batch> {
        let mut book = self.lock();
        if book.closed || book.started != book.completed {
            return None;
        }

        let len = book.pending.len();
        if len != book.last_len {
            book.last_len = len;
            book.quiet_ticks = 0;
        } else {
            book.quiet_ticks = book.quiet_ticks.saturating_add(1);
        }
        if book.quiet_ticks < self.settings.settle_ticks {
            return None;
        }

        let done: Vec<RuleId> = book
            .pending
            .values()
            .filter(|e| e.done)
            .map(|e| e.rule_id)
            .collect();
        if done.is_empty() {
            return None;
        }

        let entries: Vec<PendingEntry> = done
            .iter()
            .filter_map(|id| book.pending.remove(id))
            .collect();
        book.in_flight = done.into_iter().collect();
        book.started += 1;
        book.last_len = book.pending.len();

        Some(Batch {
            key: self.key.clone(),
            generation: book.started,
            entries,
        })
    }

    /// Record a finished batch and release every waiter.
    pub(crate) fn finish_cycle(&self, report: CycleReport) {
        let mut book = self.lock();
        let generation = report.generation;

        for (rule_id, result) in &report.outcomes {
            // Re-registered while in flight: the newer request owns the slot.
            if book.pending.contains_key(rule_id) {
                continue;
            }
            book.outcomes.insert(
                *rule_id,
                RuleOutcome {
                    generation,
                    result: result.clone(),
                },
            );
        }

        let retention = self.settings.outcome_retention_cycles;
        let before = book.outcomes.len();
        book.outcomes
            .retain(|_, o| o.generation.saturating_add(retention) > generation);
        let pruned = before - book.outcomes.len();
        if pruned > 0 {
            debug!(key = %self.key, pruned, "pruned uncollected reorder outcomes");
        }

        book.in_flight.clear();
        book.completed = generation;
        book.last_report = Some(report);

        if !book.closed {
            self.gate.send_replace(GateState {
                completed: generation,
                closed: false,
            });
        }
    }

    /// Gate receiver plus the generation whose completion covers every entry
    /// currently marked done or in flight.
    pub(crate) fn reorder_target(&self) -> (watch::Receiver<GateState>, u64) {
        let book = self.lock();
        let target = if book.pending.values().any(|e| e.done) {
            book.started + 1
        } else {
            book.started
        };
        (self.gate.subscribe(), target)
    }

    /// Take the outcome for `rule_id`, or a receiver to wait on.
    pub(crate) fn poll_rule(&self, rule_id: RuleId) -> RulePoll {
        let mut book = self.lock();
        if book.closed {
            return RulePoll::Closed;
        }
        if let Some(outcome) = book.outcomes.remove(&rule_id) {
            return RulePoll::Ready(outcome.result);
        }
        if book.pending.contains_key(&rule_id) || book.in_flight.contains(&rule_id) {
            return RulePoll::Waiting(self.gate.subscribe());
        }
        RulePoll::Unknown
    }

    pub(crate) fn last_report(&self) -> Option<CycleReport> {
        self.lock().last_report.clone()
    }

    pub(crate) fn stats(&self) -> KeyStats {
        let book = self.lock();
        KeyStats {
            pending: book.pending.len(),
            pending_done: book.pending.values().filter(|e| e.done).count(),
            in_flight: book.in_flight.len(),
            uncollected_outcomes: book.outcomes.len(),
            cycles_started: book.started,
            cycles_completed: book.completed,
        }
    }

    /// Drop all state and wake every waiter with `closed`.
    pub(crate) fn close(&self) {
        let mut book = self.lock();
        book.closed = true;
        book.pending.clear();
        book.in_flight.clear();
        book.outcomes.clear();
        let completed = book.completed;
        self.gate.send_replace(GateState {
            completed,
            closed: true,
        });
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct Slot {
    cycle: Arc<KeyCycle>,
    ticker: JoinHandle<()>,
}

/// Process-wide map from resource-type key to its cycle state.
#[derive(Default)]
pub(crate) struct Registry {
    slots: Mutex<HashMap<ResourceTypeKey, Slot>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceTypeKey, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, key: &ResourceTypeKey) -> Option<Arc<KeyCycle>> {
        self.lock().get(key).map(|s| Arc::clone(&s.cycle))
    }

    /// Existing cycle for `key`, or a new one whose ticker `arm` spawns.
    pub(crate) fn get_or_create<F>(
        &self,
        key: &ResourceTypeKey,
        settings: &EngineSettings,
        arm: F,
    ) -> Arc<KeyCycle>
    where
        F: FnOnce(Arc<KeyCycle>) -> JoinHandle<()>,
    {
        let mut slots = self.lock();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(&slot.cycle);
        }
        let cycle = Arc::new(KeyCycle::new(key.clone(), settings.clone()));
        let ticker = arm(Arc::clone(&cycle));
        slots.insert(
            key.clone(),
            Slot {
                cycle: Arc::clone(&cycle),
                ticker,
            },
        );
        cycle
    }

    pub(crate) fn keys(&self) -> Vec<ResourceTypeKey> {
        let mut keys: Vec<ResourceTypeKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Stop every ticker and close every gate. Returns how many keys existed.
    pub(crate) fn clear(&self) -> usize {
        let drained: Vec<Slot> = self.lock().drain().map(|(_, s)| s).collect();
        let n = drained.len();
        for slot in drained {
            slot.ticker.abort();
            slot.cycle.close();
        }
        n
    }
}
