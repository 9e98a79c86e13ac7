//! # Constellation Manager
//!
//! Device-assignment and lifecycle tracker: given a device roster and a
//! strategy, assigns each task in a constellation to a device, validates the
//! result, and keeps a registry of constellations for status queries.
//!
//! The pure decision functions ([`round_robin`], [`capability_match`],
//! [`load_balance`]) are kept separate from the stateful
//! [`ConstellationManager`] service so each strategy is independently unit
//! testable without a constellation or registry in scope.

mod strategy;

pub use strategy::{capability_match, load_balance, round_robin, AssignmentPreferences, AssignmentStrategy};

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, warn};

use crate::constellation::{Constellation, Task, TaskUpdate};
use crate::device_manager::DeviceInfo;
use crate::errors::{OrchestrationError, OrchestrationResult};

/// Metadata recorded alongside a registered constellation. Free-form: the
/// orchestrator stamps it with the assignment strategy used; callers may
/// attach anything else relevant to their deployment.
#[derive(Debug, Clone, Default)]
pub struct RegistrationMetadata {
    pub assignment_strategy: Option<String>,
    pub extra: Value,
}

struct RegisteredConstellation {
    constellation: Constellation,
    metadata: RegistrationMetadata,
}

/// Assigns devices to tasks and tracks registered constellations.
///
/// Cheaply cloneable; all clones share the same registry (mirroring
/// [`crate::events::EventBus`]'s clone semantics).
#[derive(Clone)]
pub struct ConstellationManager {
    registry: std::sync::Arc<Mutex<HashMap<String, RegisteredConstellation>>>,
}

impl std::fmt::Debug for ConstellationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstellationManager").finish()
    }
}

impl Default for ConstellationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstellationManager {
    pub fn new() -> Self {
        Self {
            registry: std::sync::Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Assigns every task in `constellation` a device per `strategy`,
    /// applying assignments in-place. Tasks already RUNNING or terminal are
    /// left untouched (I3) even if the strategy would otherwise reassign
    /// them.
    pub fn assign_devices(
        &self,
        constellation: &mut Constellation,
        strategy: AssignmentStrategy,
        devices: &[DeviceInfo],
        preferences: Option<&AssignmentPreferences>,
    ) -> OrchestrationResult<()> {
        if devices.is_empty() {
            return Err(OrchestrationError::no_device_available("<all>"));
        }

        let task_ids: Vec<String> = constellation.task_ids_in_order().to_vec();
        let modifiable_tasks: Vec<Task> = task_ids
            .iter()
            .filter_map(|id| constellation.task(id))
            .filter(|t| t.status.is_modifiable())
            .cloned()
            .collect();

        let device_ids: Vec<String> = devices.iter().map(|d| d.device_id.clone()).collect();
        let typed_devices: Vec<(String, String)> = devices
            .iter()
            .map(|d| (d.device_id.clone(), d.device_type.clone()))
            .collect();

        let assignments = match strategy {
            AssignmentStrategy::RoundRobin => {
                round_robin(&modifiable_tasks, &device_ids, preferences)
            }
            AssignmentStrategy::CapabilityMatch => {
                capability_match(&modifiable_tasks, &typed_devices)
            }
            AssignmentStrategy::LoadBalance => load_balance(&modifiable_tasks, &device_ids),
        };

        for (task_id, device_id) in assignments {
            constellation.update_task(
                &task_id,
                TaskUpdate {
                    target_device_id: Some(device_id),
                    ..Default::default()
                },
            )?;
        }

        debug!(
            constellation_id = %constellation.constellation_id,
            strategy = ?strategy,
            "assigned devices to constellation tasks"
        );
        Ok(())
    }

    /// Single-task override. Permitted only while the task is still
    /// pre-execution (I3).
    pub fn reassign_task(
        &self,
        constellation: &mut Constellation,
        task_id: &str,
        device_id: impl Into<String>,
    ) -> OrchestrationResult<()> {
        constellation.update_task(
            task_id,
            TaskUpdate {
                target_device_id: Some(device_id.into()),
                ..Default::default()
            },
        )
    }

    /// Removes every `target_device_id` from modifiable tasks.
    pub fn clear_assignments(&self, constellation: &mut Constellation) -> OrchestrationResult<()> {
        let task_ids: Vec<String> = constellation.task_ids_in_order().to_vec();
        for task_id in task_ids {
            let modifiable = constellation
                .task(&task_id)
                .map(|t| t.status.is_modifiable())
                .unwrap_or(false);
            if !modifiable {
                continue;
            }
            let has_assignment = constellation
                .task(&task_id)
                .map(|t| t.target_device_id.is_some())
                .unwrap_or(false);
            if has_assignment {
                // `update_task` leaves fields untouched on `None`; clearing
                // requires a direct field reset, so we go through the task
                // accessor rather than `TaskUpdate`, which only ever sets.
                constellation.clear_task_device(&task_id)?;
            }
        }
        Ok(())
    }

    /// Reports every task without a `target_device_id`.
    pub fn validate_assignments(
        &self,
        constellation: &Constellation,
    ) -> (bool, Vec<OrchestrationError>) {
        let errors: Vec<OrchestrationError> = constellation
            .tasks()
            .filter(|t| t.target_device_id.is_none())
            .map(|t| OrchestrationError::missing_device_assignment(t.task_id.clone()))
            .collect();
        (errors.is_empty(), errors)
    }

    pub fn register(&self, constellation: Constellation, metadata: Option<RegistrationMetadata>) {
        let id = constellation.constellation_id.clone();
        let mut registry = self.registry.lock().unwrap();
        registry.insert(
            id,
            RegisteredConstellation {
                constellation,
                metadata: metadata.unwrap_or_default(),
            },
        );
    }

    /// Updates the registered snapshot for `constellation_id`, if registered.
    pub fn update_registered(&self, constellation: Constellation) {
        let id = constellation.constellation_id.clone();
        let mut registry = self.registry.lock().unwrap();
        if let Some(entry) = registry.get_mut(&id) {
            entry.constellation = constellation;
        } else {
            warn!(constellation_id = %id, "update_registered called on an unregistered constellation");
        }
    }

    pub fn unregister(&self, constellation_id: &str) -> bool {
        self.registry.lock().unwrap().remove(constellation_id).is_some()
    }

    pub fn status(&self, constellation_id: &str) -> Option<Constellation> {
        self.registry
            .lock()
            .unwrap()
            .get(constellation_id)
            .map(|entry| entry.constellation.clone())
    }

    pub fn list(&self) -> Vec<String> {
        self.registry.lock().unwrap().keys().cloned().collect()
    }

    /// Per-device assigned-task counts among modifiable and running tasks in
    /// `constellation` (terminal tasks still "occupy" the device for
    /// accounting purposes, since they ran there).
    pub fn get_device_utilization(&self, constellation: &Constellation) -> HashMap<String, usize> {
        let mut utilization: HashMap<String, usize> = HashMap::new();
        for task in constellation.tasks() {
            if let Some(device_id) = &task.target_device_id {
                *utilization.entry(device_id.clone()).or_insert(0) += 1;
            }
        }
        utilization
    }
}
