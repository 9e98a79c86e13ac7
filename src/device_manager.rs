//! # Device Manager Interface
//!
//! The outbound contract the orchestrator consumes. Implementations manage
//! device sessions, registration, heartbeats, and reconnection — none of
//! that is in scope here; the orchestrator only ever calls the three
//! operations below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::constellation::Task;
use crate::errors::OrchestrationResult;

/// Snapshot of a device as reported by the device manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_type: String,
    pub capabilities: Vec<String>,
    pub status: String,
    pub metadata: serde_json::Value,
}

/// Outcome of dispatching a task to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// The contract the orchestrator relies on to reach devices. Implementation
/// (WebSocket sessions, heartbeats, reconnection) is out of scope for this
/// crate — this trait is the seam.
#[async_trait]
pub trait DeviceManager: Send + Sync {
    async fn list_connected(&self) -> OrchestrationResult<Vec<String>>;

    async fn get_info(&self, device_id: &str) -> OrchestrationResult<Option<DeviceInfo>>;

    /// Dispatch `task` to `device_id`, awaiting its outcome. Must honor
    /// `cancellation` by returning promptly with a failed/cancelled outcome
    /// rather than running to completion.
    async fn dispatch(
        &self,
        task: &Task,
        device_id: &str,
        cancellation: CancellationToken,
    ) -> OrchestrationResult<DispatchOutcome>;
}

#[cfg(test)]
pub mod mock {
    //! An in-memory [`DeviceManager`] test double, scriptable per device id.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    pub enum ScriptedResponse {
        Success(serde_json::Value),
        Failure(String),
        /// Completes after the given delay, useful for exercising
        /// concurrency in the scheduling loop.
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

        pub fn with_device_type(mut self, device_id: &str, device_type: &str) -> Self {
            if let Some(device) = self.devices.iter_mut().find(|d| d.device_id == device_id) {
                device.device_type = device_type.to_string();
            }
            self
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
            Ok(self
                .devices
                .iter()
                .find(|d| d.device_id == device_id)
                .cloned())
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
}
