//! # Dependency
//!
//! A directed edge `from -> to`: "this task must complete before that task
//! may start". Edges carry no runtime condition evaluation; satisfaction
//! means the *from* task reached `COMPLETED`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub dependency_id: String,
    pub from_task_id: String,
    pub to_task_id: String,
    /// Opaque text used only as a planner hint; no runtime evaluation.
    pub condition_description: Option<String>,
}

impl Dependency {
    pub fn new(
        dependency_id: impl Into<String>,
        from_task_id: impl Into<String>,
        to_task_id: impl Into<String>,
    ) -> Self {
        Self {
            dependency_id: dependency_id.into(),
            from_task_id: from_task_id.into(),
            to_task_id: to_task_id.into(),
            condition_description: None,
        }
    }

    pub fn with_condition(mut self, description: impl Into<String>) -> Self {
        self.condition_description = Some(description.into());
        self
    }
}
