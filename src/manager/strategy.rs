//! # Assignment Strategies
//!
//! Pure functions that decide which device a task lands on. Kept free of any
//! [`crate::constellation::Constellation`] mutation so each strategy is
//! testable on a plain task list.

use std::collections::HashMap;

use crate::constellation::Task;

/// Exactly the three strategies named in the contract; an unrecognized
/// strategy name is a caller error, not a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStrategy {
    RoundRobin,
    CapabilityMatch,
    LoadBalance,
}

impl std::fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AssignmentStrategy::RoundRobin => "round_robin",
            AssignmentStrategy::CapabilityMatch => "capability_match",
            AssignmentStrategy::LoadBalance => "load_balance",
        };
        write!(f, "{label}")
    }
}

impl std::str::FromStr for AssignmentStrategy {
    type Err = crate::errors::OrchestrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round_robin" | "round-robin" => Ok(Self::RoundRobin),
            "capability_match" | "capability-match" => Ok(Self::CapabilityMatch),
            "load_balance" | "load-balance" => Ok(Self::LoadBalance),
            other => Err(crate::errors::OrchestrationError::unknown_strategy(other)),
        }
    }
}

/// Per-task device preference hints consumed by [`round_robin`]. A
/// preference naming a device not present in the roster is ignored rather
/// than treated as fatal (per the contract's `preference ignored`
/// non-fatal clause).
#[derive(Debug, Clone, Default)]
pub struct AssignmentPreferences {
    pub by_task_id: HashMap<String, String>,
}

impl AssignmentPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, task_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.by_task_id.insert(task_id.into(), device_id.into());
        self
    }
}

/// Iterate tasks in the order given, assigning the next device cyclically.
/// A preference naming a currently-available device overrides the cyclic
/// pick for that task without advancing the cursor.
pub fn round_robin(
    tasks: &[Task],
    devices: &[String],
    preferences: Option<&AssignmentPreferences>,
) -> Vec<(String, String)> {
    if devices.is_empty() {
        return Vec::new();
    }
    let mut cursor = 0usize;
    let mut assignments = Vec::with_capacity(tasks.len());
    for task in tasks {
        let preferred = preferences
            .and_then(|p| p.by_task_id.get(&task.task_id))
            .filter(|device_id| devices.contains(device_id));
        let device_id = if let Some(device_id) = preferred {
            device_id.clone()
        } else {
            let device_id = devices[cursor % devices.len()].clone();
            cursor += 1;
            device_id
        };
        assignments.push((task.task_id.clone(), device_id));
    }
    assignments
}

/// For each task, prefer a device whose type matches `task.device_type`;
/// fall back to the first available device if none match (or the task has
/// no `device_type` requirement).
pub fn capability_match(tasks: &[Task], devices: &[(String, String)]) -> Vec<(String, String)> {
    tasks
        .iter()
        .filter_map(|task| {
            if devices.is_empty() {
                return None;
            }
            let picked = task
                .device_type
                .as_ref()
                .and_then(|wanted| devices.iter().find(|(_, kind)| kind == wanted))
                .or_else(|| devices.first());
            picked.map(|(device_id, _)| (task.task_id.clone(), device_id.clone()))
        })
        .collect()
}

/// Assign each task to the device with the current minimum running count,
/// incrementing that count; ties are broken by device-list order.
pub fn load_balance(tasks: &[Task], devices: &[String]) -> Vec<(String, String)> {
    if devices.is_empty() {
        return Vec::new();
    }
    let mut counts: Vec<usize> = vec![0; devices.len()];
    let mut assignments = Vec::with_capacity(tasks.len());
    for task in tasks {
        let (index, _) = counts
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| **count)
            .expect("devices is non-empty");
        counts[index] += 1;
        assignments.push((task.task_id.clone(), devices[index].clone()));
    }
    assignments
}
