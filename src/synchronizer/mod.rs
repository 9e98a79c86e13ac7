//! # Modification Synchronizer
//!
//! The event-driven lock that sits between a task completion and the
//! planner's `CONSTELLATION_MODIFIED` signal: while an edit cycle is open for
//! a task, the scheduling loop must not dispatch new work until either the
//! planner closes the cycle or the timeout forces it closed.
//!
//! `pending` is the one piece of state every concurrent path touches (the
//! event-observer path writes it on TASK_COMPLETED / TASK_FAILED /
//! CONSTELLATION_MODIFIED / timeout; the gate reads and awaits it). A single
//! `tokio::sync::Mutex` is the arbiter — no direct map writes ever happen
//! outside it, matching the "pick one arbiter" guidance for this kind of
//! shared state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::config::SynchronizerConfig;
use crate::constellation::Constellation;
use crate::events::{Event, EventObserver};

/// Why a pending edit cycle was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// `CONSTELLATION_MODIFIED` named this task id.
    Modified,
    /// The modification timeout elapsed before the planner responded.
    TimedOut,
}

struct PendingEntry {
    sender: Option<oneshot::Sender<ReleaseReason>>,
}

#[derive(Default)]
struct SynchronizerState {
    pending: HashMap<String, PendingEntry>,
    current_constellation: Option<Constellation>,
    total: u64,
    completed: u64,
    timed_out: u64,
}

/// Statistics snapshot for observability.
#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronizerStats {
    pub total: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub currently_pending: usize,
}

/// Event-driven gate between task completions and planner edits.
///
/// Cheaply cloneable; every clone shares the same pending set and timeout
/// configuration.
#[derive(Clone)]
pub struct ModificationSynchronizer {
    state: Arc<Mutex<SynchronizerState>>,
    config: SynchronizerConfig,
}

impl std::fmt::Debug for ModificationSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModificationSynchronizer")
            .field("modification_timeout", &self.config.modification_timeout)
            .finish()
    }
}

impl ModificationSynchronizer {
    pub fn new(config: SynchronizerConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(SynchronizerState::default())),
            config,
        }
    }

    /// Registers a pending edit cycle for `task_id` if one isn't already
    /// open, and arms a timeout that force-releases it. Idempotent:
    /// redundant TASK_COMPLETED/TASK_FAILED notifications for a task already
    /// pending are a no-op beyond the statistics counter.
    async fn open_edit_cycle(&self, task_id: String) {
        let (tx, rx) = oneshot::channel();
        let already_pending = {
            let mut state = self.state.lock().await;
            if state.pending.contains_key(&task_id) {
                true
            } else {
                state.pending.insert(task_id.clone(), PendingEntry { sender: Some(tx) });
                state.total += 1;
                false
            }
        };
        if already_pending {
            return;
        }

        debug!(task_id = %task_id, "opened modification edit cycle");

        let state = Arc::clone(&self.state);
        let timeout = self.config.modification_timeout;
        let task_id_for_timeout = task_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    let mut state = state.lock().await;
                    if let Some(mut entry) = state.pending.remove(&task_id_for_timeout) {
                        if let Some(sender) = entry.sender.take() {
                            let _ = sender.send(ReleaseReason::TimedOut);
                        }
                        state.timed_out += 1;
                        warn!(
                            task_id = %task_id_for_timeout,
                            "modification timeout elapsed; edit cycle force-released"
                        );
                    }
                }
                _ = rx => {
                    // Closed by CONSTELLATION_MODIFIED before the timeout fired.
                }
            }
        });
    }

    /// Fires the pending signal for every task id named in a
    /// `CONSTELLATION_MODIFIED` event and adopts the planner's snapshot as
    /// `current_constellation`.
    async fn close_edit_cycles(&self, task_ids: &[String], new_constellation: Constellation) {
        let mut state = self.state.lock().await;
        for task_id in task_ids {
            if let Some(mut entry) = state.pending.remove(task_id) {
                if let Some(sender) = entry.sender.take() {
                    let _ = sender.send(ReleaseReason::Modified);
                }
                state.completed += 1;
                debug!(task_id = %task_id, "closed modification edit cycle");
            }
        }
        state.current_constellation = Some(new_constellation);
    }

    /// The gate: if `pending` is empty, returns immediately. Otherwise awaits
    /// every signal currently pending, settling repeatedly to catch any new
    /// signal that arrives while waiting. Returns `true` if everything
    /// cleared within `timeout`; on the caller's own timeout, force-clears
    /// `pending` and returns `false`.
    pub async fn wait_for_pending(&self, timeout: Option<Duration>) -> bool {
        // A settle loop, not a one-shot join: `open_edit_cycle` may insert a
        // new entry for a task that completes while we're already waiting on
        // an earlier one, so we re-check the pending set after every drain
        // rather than snapshotting it once up front.
        let deadline_fut = async {
            loop {
                if self.state.lock().await.pending.is_empty() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };

        match timeout {
            Some(timeout) => {
                if tokio::time::timeout(timeout, deadline_fut).await.is_ok() {
                    true
                } else {
                    let mut state = self.state.lock().await;
                    let cleared = !state.pending.is_empty();
                    state.pending.clear();
                    if cleared {
                        warn!("wait_for_pending timed out; pending set force-cleared");
                    }
                    false
                }
            }
            None => {
                deadline_fut.await;
                true
            }
        }
    }

    /// Merges the orchestrator's current view with the planner's most recent
    /// `CONSTELLATION_MODIFIED` snapshot (if any). Topology is taken from the
    /// planner; per-task status/result/error/timestamps are taken from
    /// whichever side is further along the advancement order (I5), so
    /// in-flight or just-finished scheduler progress is never lost even if
    /// the planner's snapshot predates it.
    pub async fn merge(&self, scheduler_view: &Constellation) -> Constellation {
        let planner_view = {
            let state = self.state.lock().await;
            state.current_constellation.clone()
        };

        let Some(mut merged) = planner_view else {
            return scheduler_view.clone();
        };

        for scheduler_task in scheduler_view.tasks() {
            let Some(planner_task) = merged.task(&scheduler_task.task_id) else {
                continue;
            };
            if scheduler_task.status.rank() > planner_task.status.rank() {
                let winner = scheduler_task.clone();
                merged.overwrite_task(winner);
            }
        }

        merged.recompute_state();
        merged
    }

    pub async fn stats(&self) -> SynchronizerStats {
        let state = self.state.lock().await;
        SynchronizerStats {
            total: state.total,
            completed: state.completed,
            timed_out: state.timed_out,
            currently_pending: state.pending.len(),
        }
    }

    #[cfg(test)]
    async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

/// Registers the synchronizer as an [`EventObserver`] of TASK_COMPLETED,
/// TASK_FAILED, and CONSTELLATION_MODIFIED.
#[async_trait]
impl EventObserver for ModificationSynchronizer {
    fn id(&self) -> String {
        "modification-synchronizer".to_string()
    }

    async fn on_event(&self, event: &Event) {
        match event {
            Event::Task(task_event) => {
                use crate::events::EventType;
                if matches!(
                    task_event.event_type,
                    EventType::TaskCompleted | EventType::TaskFailed
                ) {
                    self.open_edit_cycle(task_event.task_id.clone()).await;
                }
            }
            Event::Constellation(c_event) => {
                use crate::events::EventType;
                if c_event.event_type == EventType::ConstellationModified {
                    let task_ids = c_event.on_task_id.clone().unwrap_or_default();
                    if let Some(new_constellation) = c_event.new_constellation.clone() {
                        self.close_edit_cycles(&task_ids, new_constellation).await;
                    }
                }
            }
        }
    }
}
