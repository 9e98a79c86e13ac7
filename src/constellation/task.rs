//! # Task
//!
//! One unit of work targeted at one device.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a [`Task`].
///
/// Ordering for the merge rule ("advancement order") is given by [`rank`],
/// not by declaration order: `Pending=0 < WaitingDependency=1 < Running=2 <
/// {Completed, Failed, Cancelled}=3`.
///
/// [`rank`]: TaskStatus::rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    WaitingDependency,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Position in the advancement order used by I5 and by the
    /// synchronizer's merge rule.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::WaitingDependency => 1,
            TaskStatus::Running => 2,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => 3,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Pre-execution states in which a task's fields and edges may still be
    /// changed (I3).
    #[must_use]
    pub fn is_modifiable(self) -> bool {
        self.rank() < TaskStatus::Running.rank()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::WaitingDependency => "WAITING_DEPENDENCY",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{label}")
    }
}

/// A single unit of work targeted at one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub name: String,
    pub description: String,
    /// Higher values are scheduled first among ready tasks.
    pub priority: i64,
    pub device_type: Option<String>,
    pub target_device_id: Option<String>,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_start_time: Option<DateTime<Utc>>,
    pub execution_end_time: Option<DateTime<Utc>>,
    pub tips: Option<String>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            name: name.into(),
            description: String::new(),
            priority: 0,
            device_type: None,
            target_device_id: None,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            execution_start_time: None,
            execution_end_time: None,
            tips: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_target_device(mut self, device_id: impl Into<String>) -> Self {
        self.target_device_id = Some(device_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tips(mut self, tips: impl Into<String>) -> Self {
        self.tips = Some(tips.into());
        self
    }
}

/// Modifiable subset of [`Task`] fields accepted by `update_task`. `None`
/// leaves the current value untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub device_type: Option<String>,
    pub target_device_id: Option<String>,
    pub tips: Option<String>,
}

impl TaskUpdate {
    pub fn apply(self, task: &mut Task) {
        if let Some(name) = self.name {
            task.name = name;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(device_type) = self.device_type {
            task.device_type = Some(device_type);
        }
        if let Some(target_device_id) = self.target_device_id {
            task.target_device_id = Some(target_device_id);
        }
        if let Some(tips) = self.tips {
            task.tips = Some(tips);
        }
    }
}
