//! # Orchestration Configuration
//!
//! Plain, in-process configuration structs. No file loading, no environment
//! parsing — the embedding application constructs these directly and hands
//! them to the components that need them.

use std::time::Duration;

/// Configuration for the [`crate::synchronizer::ModificationSynchronizer`].
#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
    /// How long a pending task's completion signal waits for a matching
    /// `CONSTELLATION_MODIFIED` before it is force-cleared.
    pub modification_timeout: Duration,
}

impl Default for SynchronizerConfig {
    fn default() -> Self {
        Self {
            modification_timeout: Duration::from_secs(600),
        }
    }
}

/// Configuration for the [`crate::orchestrator::Orchestrator`] scheduling loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// When a planner edit leaves a task without a device assignment, assign
    /// one automatically via the active strategy rather than failing the
    /// orchestration outright.
    ///
    /// Source material is inconsistent about which behavior is correct; both
    /// paths exist. This flag pins the choice per orchestration instance.
    pub auto_assign_missing_devices: bool,

    /// Idle sleep between scheduling passes when no task is in flight.
    pub idle_poll_interval: Duration,

    /// Per-pass bound the scheduling loop gives `wait_for_pending` before
    /// treating the gate as the "last-resort unblock" spec §4.4 describes.
    /// Deliberately much shorter than `SynchronizerConfig::modification_timeout`
    /// (600s default): that timeout bounds how long a single task's edit
    /// cycle may stay open, but the loop itself must not stall a whole
    /// scheduling pass on it whenever the planner simply never closes the
    /// cycle for a given task.
    pub sync_wait_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_assign_missing_devices: true,
            idle_poll_interval: Duration::from_millis(100),
            sync_wait_timeout: Duration::from_secs(2),
        }
    }
}
