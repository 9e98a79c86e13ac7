//! Event-driven DAG orchestrator for task constellations across a fleet of
//! heterogeneous remote devices.
//!
//! The crate maintains a live task DAG (a [`constellation`]) whose topology
//! may be edited by an external planner while tasks are executing, schedules
//! ready tasks concurrently onto assigned devices, and reconciles concurrent
//! structural edits with concurrent execution progress through an
//! event-driven lock ([`synchronizer`]).
//!
//! # Modules
//!
//! - [`events`] — in-process publish/subscribe broker all lifecycle events
//!   flow through
//! - [`constellation`] — the mutable task graph: tasks, dependencies,
//!   per-task status and device assignment, and the invariants every
//!   mutation preserves
//! - [`manager`] — device-assignment strategies and the constellation
//!   registry
//! - [`synchronizer`] — the lock between a task completion and the planner's
//!   `CONSTELLATION_MODIFIED` response
//! - [`orchestrator`] — the scheduling loop that ties the above together
//! - [`device_manager`] — the outbound contract the orchestrator dispatches
//!   work through; implementation is the embedding application's concern
//!
//! Planner integration, device fleet management, and the per-task
//! device-side execution machinery are out of scope for this crate — it
//! consumes and produces events and trait objects at those seams.

pub mod config;
pub mod constellation;
pub mod device_manager;
pub mod errors;
pub mod events;
pub mod manager;
pub mod orchestrator;
pub mod synchronizer;

pub use config::{OrchestratorConfig, SynchronizerConfig};
pub use constellation::{Constellation, ConstellationState, ConstellationStats, Dependency, Task, TaskStatus, TaskUpdate};
pub use device_manager::{DeviceInfo, DeviceManager, DispatchOutcome};
pub use errors::{OrchestrationError, OrchestrationResult};
pub use events::{
    ConstellationEvent, Event, EventBus, EventEnvelope, EventObserver, EventType,
    SubscriptionFilter, TaskEvent,
};
pub use manager::{AssignmentPreferences, AssignmentStrategy, ConstellationManager};
pub use orchestrator::{OrchestrationOutcome, Orchestrator, TaskResult};
pub use synchronizer::{ModificationSynchronizer, ReleaseReason, SynchronizerStats};
