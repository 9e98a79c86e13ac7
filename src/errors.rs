//! # Error Types
//!
//! Unified error handling for the orchestrator core. Every mutation surface in
//! this crate — the DAG, the manager, the synchronizer, the scheduling loop —
//! returns `OrchestrationResult<T>` rather than panicking.

use thiserror::Error;

/// Crate-wide result alias.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Comprehensive error taxonomy for orchestration operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("task id already exists: {task_id}")]
    DuplicateTaskId { task_id: String },

    #[error("dependency id already exists: {dependency_id}")]
    DuplicateDependencyId { dependency_id: String },

    #[error("unknown task: {task_id}")]
    UnknownTask { task_id: String },

    #[error("unknown dependency: {dependency_id}")]
    UnknownDependency { dependency_id: String },

    #[error("unknown device: {device_id}")]
    UnknownDevice { device_id: String },

    #[error("unknown assignment strategy: {strategy}")]
    UnknownStrategy { strategy: String },

    #[error("adding dependency {from} -> {to} would introduce a cycle")]
    CycleDetected { from: String, to: String },

    #[error("dependency graph contains a cycle")]
    GraphHasCycle,

    #[error("task {task_id} is immutable in status {status}")]
    ImmutableTask { task_id: String, status: String },

    #[error("dependency {dependency_id} references a missing endpoint: {task_id}")]
    DanglingDependency {
        dependency_id: String,
        task_id: String,
    },

    #[error("no device available for task {task_id}")]
    NoDeviceAvailable { task_id: String },

    #[error("task {task_id} has no device assignment")]
    MissingDeviceAssignment { task_id: String },

    #[error("dispatch failed for task {task_id}: {reason}")]
    DispatchFailed { task_id: String, reason: String },

    #[error("dispatch cancelled for task {task_id}")]
    DispatchCancelled { task_id: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    pub fn duplicate_task_id(task_id: impl Into<String>) -> Self {
        Self::DuplicateTaskId {
            task_id: task_id.into(),
        }
    }

    pub fn duplicate_dependency_id(dependency_id: impl Into<String>) -> Self {
        Self::DuplicateDependencyId {
            dependency_id: dependency_id.into(),
        }
    }

    pub fn unknown_task(task_id: impl Into<String>) -> Self {
        Self::UnknownTask {
            task_id: task_id.into(),
        }
    }

    pub fn unknown_dependency(dependency_id: impl Into<String>) -> Self {
        Self::UnknownDependency {
            dependency_id: dependency_id.into(),
        }
    }

    pub fn unknown_device(device_id: impl Into<String>) -> Self {
        Self::UnknownDevice {
            device_id: device_id.into(),
        }
    }

    pub fn unknown_strategy(strategy: impl Into<String>) -> Self {
        Self::UnknownStrategy {
            strategy: strategy.into(),
        }
    }

    pub fn cycle_detected(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::CycleDetected {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn immutable_task(task_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self::ImmutableTask {
            task_id: task_id.into(),
            status: status.into(),
        }
    }

    pub fn dangling_dependency(
        dependency_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        Self::DanglingDependency {
            dependency_id: dependency_id.into(),
            task_id: task_id.into(),
        }
    }

    pub fn no_device_available(task_id: impl Into<String>) -> Self {
        Self::NoDeviceAvailable {
            task_id: task_id.into(),
        }
    }

    pub fn missing_device_assignment(task_id: impl Into<String>) -> Self {
        Self::MissingDeviceAssignment {
            task_id: task_id.into(),
        }
    }

    pub fn dispatch_failed(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DispatchFailed {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    pub fn dispatch_cancelled(task_id: impl Into<String>) -> Self {
        Self::DispatchCancelled {
            task_id: task_id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Invalid-input and invariant-violation errors are never retried
    /// automatically; dispatch failures and assignment gaps may be.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::DispatchFailed { .. } => true,
            Self::NoDeviceAvailable { .. } => true,
            Self::MissingDeviceAssignment { .. } => true,
            _ => false,
        }
    }
}
