//! # Event Types
//!
//! Events are modeled as a tagged union (sum type) rather than a trait object
//! hierarchy: two variants, [`TaskEvent`] and [`ConstellationEvent`], both
//! carrying a common envelope. Observers match on the variant.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constellation::{Constellation, ConstellationState, TaskStatus};

/// The stable set of event kinds the core consumes and produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    ConstellationStarted,
    ConstellationCompleted,
    ConstellationFailed,
    ConstellationModified,
}

/// Fields common to every event, regardless of variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Identifies the orchestrator instance that produced this event.
    pub source_id: String,
    /// Monotonic-origin timestamp; not wall-clock-comparable across processes.
    pub timestamp: DateTime<Utc>,
    /// Extensible, free-form payload for observers that want more than the
    /// typed fields below.
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            timestamp: Utc::now(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A task lifecycle event: TASK_STARTED, TASK_COMPLETED, TASK_FAILED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub envelope: EventEnvelope,
    pub event_type: EventType,
    pub constellation_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    /// Task ids newly made ready by this transition, if any.
    pub newly_ready_tasks: Vec<String>,
    /// Snapshot of the constellation at the moment the event was published.
    pub constellation_snapshot: Option<Constellation>,
}

/// A constellation lifecycle event: CONSTELLATION_STARTED/COMPLETED/FAILED,
/// and CONSTELLATION_MODIFIED (inbound, from the planner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstellationEvent {
    pub envelope: EventEnvelope,
    pub event_type: EventType,
    pub constellation_id: String,
    pub constellation_state: ConstellationState,
    pub new_ready_tasks: Vec<String>,
    pub total_tasks: Option<usize>,
    pub assignment_strategy: Option<String>,
    pub execution_duration_ms: Option<u64>,
    pub reason: Option<String>,
    /// CONSTELLATION_MODIFIED only: task ids whose pending edit cycle this
    /// event closes.
    pub on_task_id: Option<Vec<String>>,
    /// CONSTELLATION_MODIFIED only: the planner's authoritative topology.
    pub new_constellation: Option<Constellation>,
    /// CONSTELLATION_MODIFIED only: opaque, advisory modification notes.
    pub modifications: Option<Value>,
}

/// Tagged union of the two event shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    Task(TaskEvent),
    Constellation(ConstellationEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Task(e) => e.event_type,
            Event::Constellation(e) => e.event_type,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Event::Task(e) => &e.envelope.source_id,
            Event::Constellation(e) => &e.envelope.source_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Task(e) => e.envelope.timestamp,
            Event::Constellation(e) => e.envelope.timestamp,
        }
    }

    pub fn as_task_event(&self) -> Option<&TaskEvent> {
        match self {
            Event::Task(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_constellation_event(&self) -> Option<&ConstellationEvent> {
        match self {
            Event::Constellation(e) => Some(e),
            _ => None,
        }
    }
}

/// Which events a subscription matches.
#[derive(Debug, Clone)]
pub enum SubscriptionFilter {
    /// Every event published on the bus.
    All,
    /// Only events whose `event_type` is in this set.
    Types(HashSet<EventType>),
}

impl SubscriptionFilter {
    pub fn matches(&self, event_type: EventType) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Types(types) => types.contains(&event_type),
        }
    }
}
