//! Test doubles shared across integration scenarios.
//!
//! Mirrors `device_manager::mock::InMemoryDeviceManager` (the unit-test-only
//! double used inside the crate) but lives here, outside `#[cfg(test)]`,
//! because integration tests compile against the library as an external
//! crate and cannot see items gated behind the crate's own test cfg.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use constellation_orchestrator::{
    ConstellationEvent, DeviceInfo, DeviceManager, DispatchOutcome, Event, EventEnvelope,
    EventObserver, EventType, OrchestrationResult, Task, TaskEvent,
};

#[derive(Clone)]
pub enum ScriptedResponse {
    Success(serde_json::Value),
    Failure(String),
    Delayed(Duration, Box<ScriptedResponse>),
}

pub struct InMemoryDeviceManager {
    devices: Vec<DeviceInfo>,
    scripts: Mutex<HashMap<String, ScriptedResponse>>,
    default_response: ScriptedResponse,
}

impl InMemoryDeviceManager {
    pub fn new(device_ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let devices = device_ids
            .into_iter()
            .map(|id| DeviceInfo {
                device_id: id.into(),
                device_type: "generic".to_string(),
                capabilities: Vec::new(),
                status: "online".to_string(),
                metadata: serde_json::Value::Null,
            })
            .collect();
        Self {
            devices,
            scripts: Mutex::new(HashMap::new()),
            default_response: ScriptedResponse::Success(serde_json::json!({"ok": true})),
        }
    }

    pub fn script_task(&self, task_id: impl Into<String>, response: ScriptedResponse) {
        self.scripts.lock().unwrap().insert(task_id.into(), response);
    }
}

#[async_trait]
impl DeviceManager for InMemoryDeviceManager {
    async fn list_connected(&self) -> OrchestrationResult<Vec<String>> {
        Ok(self.devices.iter().map(|d| d.device_id.clone()).collect())
    }

    async fn get_info(&self, device_id: &str) -> OrchestrationResult<Option<DeviceInfo>> {
        Ok(self.devices.iter().find(|d| d.device_id == device_id).cloned())
    }

    async fn dispatch(
        &self,
        task: &Task,
        _device_id: &str,
        cancellation: CancellationToken,
    ) -> OrchestrationResult<DispatchOutcome> {
        let response = self
            .scripts
            .lock()
            .unwrap()
            .get(&task.task_id)
            .cloned()
            .unwrap_or_else(|| self.default_response.clone());
        resolve(response, &cancellation).await
    }
}

async fn resolve(
    mut response: ScriptedResponse,
    cancellation: &CancellationToken,
) -> OrchestrationResult<DispatchOutcome> {
    loop {
        match response {
            ScriptedResponse::Success(value) => return Ok(DispatchOutcome::success(value)),
            ScriptedResponse::Failure(reason) => return Ok(DispatchOutcome::failure(reason)),
            ScriptedResponse::Delayed(duration, inner) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {
                        response = *inner;
                    }
                    _ = cancellation.cancelled() => return Ok(DispatchOutcome::failure("cancelled")),
                }
            }
        }
    }
}

/// One flattened record of an observed event, enough to assert ordering
/// without matching on the full `Event` shape at every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    TaskStarted(String),
    TaskCompleted(String),
    TaskFailed(String),
    ConstellationStarted,
    ConstellationCompleted,
    ConstellationFailed,
}

/// Records every event published on the bus, in publication order, for
/// assertions on event ordering (P8) and on the literal scenarios in spec
/// §8 that name an exact expected sequence.
pub struct EventRecorder {
    log: Arc<Mutex<Vec<Recorded>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventObserver for EventRecorder {
    fn id(&self) -> String {
        "event-recorder".to_string()
    }

    async fn on_event(&self, event: &Event) {
        let recorded = match event {
            Event::Task(TaskEvent { event_type, task_id, .. }) => match event_type {
                EventType::TaskStarted => Some(Recorded::TaskStarted(task_id.clone())),
                EventType::TaskCompleted => Some(Recorded::TaskCompleted(task_id.clone())),
                EventType::TaskFailed => Some(Recorded::TaskFailed(task_id.clone())),
                _ => None,
            },
            Event::Constellation(ConstellationEvent { event_type, .. }) => match event_type {
                EventType::ConstellationStarted => Some(Recorded::ConstellationStarted),
                EventType::ConstellationCompleted => Some(Recorded::ConstellationCompleted),
                EventType::ConstellationFailed => Some(Recorded::ConstellationFailed),
                _ => None,
            },
        };
        if let Some(recorded) = recorded {
            self.log.lock().unwrap().push(recorded);
        }
    }
}

/// Builds a `CONSTELLATION_MODIFIED` event carrying `new_constellation` as
/// the planner's authoritative topology, closing the edit cycle for every
/// id in `on_task_id`.
pub fn modified_event(
    source_id: &str,
    on_task_id: Vec<String>,
    new_constellation: constellation_orchestrator::Constellation,
) -> Event {
    Event::Constellation(ConstellationEvent {
        envelope: EventEnvelope::new(source_id),
        event_type: EventType::ConstellationModified,
        constellation_id: new_constellation.constellation_id.clone(),
        constellation_state: new_constellation.state,
        new_ready_tasks: Vec::new(),
        total_tasks: None,
        assignment_strategy: None,
        execution_duration_ms: None,
        reason: None,
        on_task_id: Some(on_task_id),
        new_constellation: Some(new_constellation),
        modifications: None,
    })
}
