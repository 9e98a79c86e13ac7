//! # Constellation
//!
//! The mutable task graph: tasks, dependencies, per-task status and device
//! assignment, plus the aggregate invariants (I1-I5) that every mutation must
//! preserve.
//!
//! Tasks and dependencies are stored as two indexed collections keyed by id;
//! edges are plain `(from_id, to_id)` pairs rather than direct references, so
//! predecessor/successor sets are derived by scanning the dependency map
//! rather than walked through owned pointers.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestrationError, OrchestrationResult};

use super::dependency::Dependency;
use super::task::{Task, TaskStatus, TaskUpdate};

/// Aggregate lifecycle state of a constellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstellationState {
    Created,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

/// Status histogram plus the fields the orchestrator layers on top.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstellationStats {
    pub total_tasks: usize,
    pub pending: usize,
    pub waiting_dependency: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl ConstellationStats {
    /// Ratio of tasks that reached a terminal state via a path other than
    /// plain sequential execution is not observable from a status snapshot
    /// alone; see [`crate::orchestrator::Orchestrator`] for the high-water
    /// mark of concurrent dispatches used as the parallelism signal instead.
    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }
}

/// A DAG of tasks and dependencies plus aggregate state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constellation {
    pub constellation_id: String,
    pub name: String,
    pub state: ConstellationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    tasks: HashMap<String, Task>,
    dependencies: HashMap<String, Dependency>,
    /// Insertion order of task ids; round-robin assignment iterates this.
    task_order: Vec<String>,
}

impl Constellation {
    pub fn new(constellation_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            constellation_id: constellation_id.into(),
            name: name.into(),
            state: ConstellationState::Created,
            created_at: now,
            updated_at: now,
            tasks: HashMap::new(),
            dependencies: HashMap::new(),
            task_order: Vec::new(),
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.get(task_id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn task_ids_in_order(&self) -> &[String] {
        &self.task_order
    }

    pub fn dependency(&self, dependency_id: &str) -> Option<&Dependency> {
        self.dependencies.get(dependency_id)
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.values()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    // -- mutation: tasks --------------------------------------------------

    pub fn add_task(&mut self, task: Task) -> OrchestrationResult<()> {
        if self.tasks.contains_key(&task.task_id) {
            return Err(OrchestrationError::duplicate_task_id(task.task_id));
        }
        self.task_order.push(task.task_id.clone());
        self.tasks.insert(task.task_id.clone(), task);
        self.touch();
        Ok(())
    }

    pub fn remove_task(&mut self, task_id: &str) -> OrchestrationResult<()> {
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(task_id))?;
        if !task.status.is_modifiable() {
            return Err(OrchestrationError::immutable_task(
                task_id,
                task.status.to_string(),
            ));
        }
        self.dependencies
            .retain(|_, dep| dep.from_task_id != task_id && dep.to_task_id != task_id);
        self.tasks.remove(task_id);
        self.task_order.retain(|id| id != task_id);
        self.touch();
        Ok(())
    }

    pub fn update_task(&mut self, task_id: &str, update: TaskUpdate) -> OrchestrationResult<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(task_id))?;
        if !task.status.is_modifiable() {
            return Err(OrchestrationError::immutable_task(
                task_id,
                task.status.to_string(),
            ));
        }
        update.apply(task);
        self.touch();
        Ok(())
    }

    /// Clears `target_device_id` on a modifiable task. Not reachable through
    /// `TaskUpdate`, which only ever sets fields — used by
    /// `ConstellationManager::clear_assignments`.
    pub fn clear_task_device(&mut self, task_id: &str) -> OrchestrationResult<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(task_id))?;
        if !task.status.is_modifiable() {
            return Err(OrchestrationError::immutable_task(
                task_id,
                task.status.to_string(),
            ));
        }
        task.target_device_id = None;
        self.touch();
        Ok(())
    }

    // -- mutation: dependencies --------------------------------------------

    /// Returns the set of task ids reachable from `start` by following edges
    /// outward (`from -> to`).
    fn reachable_from(&self, start: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.to_string());
        seen.insert(start.to_string());
        while let Some(current) = queue.pop_front() {
            for dep in self.dependencies.values() {
                if dep.from_task_id == current && seen.insert(dep.to_task_id.clone()) {
                    queue.push_back(dep.to_task_id.clone());
                }
            }
        }
        seen
    }

    pub fn add_dependency(&mut self, dependency: Dependency) -> OrchestrationResult<()> {
        if self.dependencies.contains_key(&dependency.dependency_id) {
            return Err(OrchestrationError::duplicate_dependency_id(
                dependency.dependency_id,
            ));
        }
        let from_task = self
            .tasks
            .get(&dependency.from_task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(dependency.from_task_id.clone()))?;
        if !from_task.status.is_modifiable() {
            return Err(OrchestrationError::immutable_task(
                dependency.from_task_id.clone(),
                from_task.status.to_string(),
            ));
        }
        let to_task = self
            .tasks
            .get(&dependency.to_task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(dependency.to_task_id.clone()))?;
        if !to_task.status.is_modifiable() {
            return Err(OrchestrationError::immutable_task(
                dependency.to_task_id.clone(),
                to_task.status.to_string(),
            ));
        }

        // Cycle check: if `from` is reachable from `to` over existing edges,
        // adding `to -> ... -> from -> to` would close a cycle.
        if self.reachable_from(&dependency.to_task_id).contains(&dependency.from_task_id) {
            return Err(OrchestrationError::cycle_detected(
                dependency.from_task_id,
                dependency.to_task_id,
            ));
        }

        let from_completed = self
            .tasks
            .get(&dependency.from_task_id)
            .map(|t| t.status == TaskStatus::Completed)
            .unwrap_or(false);

        self.dependencies
            .insert(dependency.dependency_id.clone(), dependency.clone());

        if !from_completed {
            if let Some(to_task) = self.tasks.get_mut(&dependency.to_task_id) {
                if to_task.status == TaskStatus::Pending {
                    to_task.status = TaskStatus::WaitingDependency;
                }
            }
        }

        self.touch();
        Ok(())
    }

    pub fn remove_dependency(&mut self, dependency_id: &str) -> OrchestrationResult<()> {
        let dependency = self
            .dependencies
            .get(dependency_id)
            .ok_or_else(|| OrchestrationError::unknown_dependency(dependency_id))?;
        let to_task = self
            .tasks
            .get(&dependency.to_task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(dependency.to_task_id.clone()))?;
        if !to_task.status.is_modifiable() {
            return Err(OrchestrationError::immutable_task(
                to_task.task_id.clone(),
                to_task.status.to_string(),
            ));
        }
        self.dependencies.remove(dependency_id);
        self.touch();
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    fn predecessors_of(&self, task_id: &str) -> Vec<&Dependency> {
        self.dependencies
            .values()
            .filter(|dep| dep.to_task_id == task_id)
            .collect()
    }

    fn successors_of(&self, task_id: &str) -> Vec<&Dependency> {
        self.dependencies
            .values()
            .filter(|dep| dep.from_task_id == task_id)
            .collect()
    }

    fn predecessors_all_completed(&self, task_id: &str) -> bool {
        self.predecessors_of(task_id).iter().all(|dep| {
            self.tasks
                .get(&dep.from_task_id)
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        })
    }

    fn predecessors_have_permanent_failure(&self, task_id: &str) -> bool {
        self.predecessors_of(task_id).iter().any(|dep| {
            self.tasks
                .get(&dep.from_task_id)
                .map(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
                .unwrap_or(false)
        })
    }

    /// Tasks that are pre-execution, have every predecessor COMPLETED, and
    /// have a device assigned. Ordered by `(-priority, task_id)`.
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| {
                !t.status.is_terminal()
                    && t.status != TaskStatus::Running
                    && t.target_device_id.is_some()
                    && self.predecessors_all_completed(&t.task_id)
            })
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.task_id.cmp(&b.task_id)));
        ready.into_iter().cloned().collect()
    }

    /// Kahn's algorithm; fails with `GraphHasCycle` if the graph is not
    /// acyclic (can only happen after a planner-authoritative `merge` that
    /// skipped validation, since `add_dependency` rejects cycles on entry).
    pub fn get_topological_order(&self) -> OrchestrationResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            self.tasks.keys().map(|id| (id.as_str(), 0)).collect();
        for dep in self.dependencies.values() {
            if let Some(count) = in_degree.get_mut(dep.to_task_id.as_str()) {
                *count += 1;
            }
        }

        // Deterministic ordering among equally-ready nodes.
        let mut initial: Vec<&str> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        initial.sort_unstable();
        let mut queue: VecDeque<&str> = initial.into();

        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(current) = queue.pop_front() {
            order.push(current.to_string());
            let mut newly_free: Vec<&str> = Vec::new();
            for dep in self.successors_of(current) {
                if let Some(count) = in_degree.get_mut(dep.to_task_id.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        newly_free.push(dep.to_task_id.as_str());
                    }
                }
            }
            newly_free.sort_unstable();
            for id in newly_free {
                queue.push_back(id);
            }
        }

        if order.len() != self.tasks.len() {
            return Err(OrchestrationError::GraphHasCycle);
        }
        Ok(order)
    }

    /// Checks I2 and I4 without mutating. Returns `(true, [])` if the graph
    /// is consistent.
    pub fn validate_dag(&self) -> (bool, Vec<OrchestrationError>) {
        let mut errors = Vec::new();
        for dep in self.dependencies.values() {
            if !self.tasks.contains_key(&dep.from_task_id) {
                errors.push(OrchestrationError::dangling_dependency(
                    dep.dependency_id.clone(),
                    dep.from_task_id.clone(),
                ));
            }
            if !self.tasks.contains_key(&dep.to_task_id) {
                errors.push(OrchestrationError::dangling_dependency(
                    dep.dependency_id.clone(),
                    dep.to_task_id.clone(),
                ));
            }
        }
        if self.get_topological_order().is_err() {
            errors.push(OrchestrationError::GraphHasCycle);
        }
        (errors.is_empty(), errors)
    }

    /// True iff every task is terminal. Vacuously true for an empty
    /// constellation — orchestrating one must terminate rather than spin on
    /// the scheduling loop's idle sleep forever.
    pub fn is_complete(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    pub fn stats(&self) -> ConstellationStats {
        let mut stats = ConstellationStats {
            total_tasks: self.tasks.len(),
            ..Default::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::WaitingDependency => stats.waiting_dependency += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Per §7's terminal-state policy: COMPLETED iff every task is
    /// COMPLETED; FAILED if any task is FAILED (even alongside CANCELLED
    /// descendants blocked by that failure); otherwise left as EXECUTING.
    pub fn recompute_state(&mut self) {
        if !self.is_complete() {
            if self.state == ConstellationState::Created {
                return;
            }
            self.state = ConstellationState::Executing;
            return;
        }
        let stats = self.stats();
        self.state = if stats.failed > 0 {
            ConstellationState::Failed
        } else {
            ConstellationState::Completed
        };
    }

    pub fn start_execution(&mut self) {
        self.state = ConstellationState::Executing;
        self.touch();
    }

    // -- execution-facing mutation ------------------------------------------

    /// Transition `task_id` from RUNNING to a terminal state. Returns the ids
    /// of tasks newly made ready (tasks previously WAITING_DEPENDENCY whose
    /// predecessors are now all COMPLETED).
    ///
    /// On failure, also cascades CANCELLED to every descendant that can now
    /// never become ready (at least one predecessor permanently failed or was
    /// itself cancelled) — without this, a constellation containing any
    /// failed task could never reach `is_complete`.
    pub fn mark_task_completed(
        &mut self,
        task_id: &str,
        success: bool,
        outcome: serde_json::Value,
    ) -> OrchestrationResult<Vec<String>> {
        {
            let task = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| OrchestrationError::unknown_task(task_id))?;
            if task.status != TaskStatus::Running {
                return Err(OrchestrationError::immutable_task(
                    task_id,
                    task.status.to_string(),
                ));
            }
            task.status = if success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            };
            if success {
                task.result = Some(outcome);
            } else {
                task.error = Some(outcome.to_string());
            }
            task.execution_end_time = Some(Utc::now());
        }

        let mut newly_ready = Vec::new();
        for dep in self.successors_of(task_id) {
            let to_id = dep.to_task_id.clone();
            let should_promote = self.predecessors_all_completed(&to_id)
                && self
                    .tasks
                    .get(&to_id)
                    .map(|t| t.status == TaskStatus::WaitingDependency)
                    .unwrap_or(false);
            if should_promote {
                if let Some(t) = self.tasks.get_mut(&to_id) {
                    t.status = TaskStatus::Pending;
                }
                newly_ready.push(to_id);
            }
        }

        if !success {
            self.cascade_cancel_from(task_id);
        }

        self.touch();
        self.recompute_state();
        Ok(newly_ready)
    }

    fn cascade_cancel_from(&mut self, failed_task_id: &str) {
        let mut queue: VecDeque<String> = self
            .successors_of(failed_task_id)
            .into_iter()
            .map(|dep| dep.to_task_id.clone())
            .collect();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(task_id) = queue.pop_front() {
            if !visited.insert(task_id.clone()) {
                continue;
            }
            let can_never_be_ready = self.predecessors_have_permanent_failure(&task_id);
            let is_pre_execution = self
                .tasks
                .get(&task_id)
                .map(|t| !t.status.is_terminal())
                .unwrap_or(false);
            if can_never_be_ready && is_pre_execution {
                if let Some(task) = self.tasks.get_mut(&task_id) {
                    task.status = TaskStatus::Cancelled;
                    task.error = Some("cancelled: upstream dependency failed".to_string());
                    task.execution_end_time = Some(Utc::now());
                }
                for dep in self.successors_of(&task_id) {
                    queue.push_back(dep.to_task_id.clone());
                }
            }
        }
    }

    /// Replaces a task wholesale, bypassing the I3 modifiability check. Used
    /// only by [`crate::synchronizer::ModificationSynchronizer::merge`] to
    /// apply the scheduler's more-advanced view of a task onto the planner's
    /// topology; the merge rule itself is what decides which side wins, not
    /// this accessor.
    pub fn overwrite_task(&mut self, task: Task) {
        if !self.tasks.contains_key(&task.task_id) {
            self.task_order.push(task.task_id.clone());
        }
        self.tasks.insert(task.task_id.clone(), task);
        self.touch();
    }

    /// Begin RUNNING `task_id`. Used by the orchestrator's dispatch path.
    pub fn start_task(&mut self, task_id: &str) -> OrchestrationResult<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestrationError::unknown_task(task_id))?;
        if task.status.is_terminal() || task.status == TaskStatus::Running {
            return Err(OrchestrationError::immutable_task(
                task_id,
                task.status.to_string(),
            ));
        }
        if task.target_device_id.is_none() {
            return Err(OrchestrationError::missing_device_assignment(task_id));
        }
        task.status = TaskStatus::Running;
        task.execution_start_time = Some(Utc::now());
        self.touch();
        Ok(())
    }
}
