//! # Orchestrator
//!
//! The scheduling loop: sync against the planner's pending edits, dispatch
//! every ready task concurrently, reap the first to finish, repeat until the
//! constellation is complete. Publishes the task and constellation lifecycle
//! events named in the contract along the way.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::constellation::{Constellation, ConstellationState, ConstellationStats, Task, TaskStatus};
use crate::device_manager::{DeviceInfo, DeviceManager, DispatchOutcome};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::events::{
    ConstellationEvent, Event, EventBus, EventEnvelope, EventType, SubscriptionFilter, TaskEvent,
};
use crate::manager::{AssignmentStrategy, ConstellationManager, RegistrationMetadata};
use crate::synchronizer::ModificationSynchronizer;

/// Outcome of a single task as reported in [`OrchestrationOutcome`].
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// The result of one `orchestrate` call.
#[derive(Debug, Clone)]
pub struct OrchestrationOutcome {
    pub constellation_id: String,
    pub final_state: ConstellationState,
    pub task_results: HashMap<String, TaskResult>,
    pub total_tasks: usize,
    pub stats: ConstellationStats,
    /// High-water mark of concurrently in-flight dispatches, the
    /// parallelism signal layered on top of the status histogram (see
    /// `Constellation::stats`'s doc comment for why it isn't derivable from
    /// the histogram alone).
    pub max_concurrent_dispatches: usize,
    pub execution_duration: Duration,
    /// `true` if the orchestration was cut short by cancellation rather than
    /// reaching a terminal constellation state.
    pub cancelled: bool,
}

/// The scheduling loop. Owns no constellation state itself — every
/// `orchestrate` call works on a constellation passed in by the caller, and
/// hands the final snapshot back to the [`ConstellationManager`] registry.
pub struct Orchestrator {
    source_id: String,
    event_bus: EventBus,
    manager: ConstellationManager,
    synchronizer: std::sync::Mutex<ModificationSynchronizer>,
    device_manager: std::sync::Mutex<Arc<dyn DeviceManager>>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("source_id", &self.source_id)
            .field("config", &self.config)
            .finish()
    }
}

fn synchronizer_filter() -> SubscriptionFilter {
    SubscriptionFilter::Types(
        [
            EventType::TaskCompleted,
            EventType::TaskFailed,
            EventType::ConstellationModified,
        ]
        .into_iter()
        .collect(),
    )
}

impl Orchestrator {
    /// Subscribes `synchronizer` to the event bus before returning, so no
    /// TASK_COMPLETED/TASK_FAILED published by a subsequent `orchestrate`
    /// call can race ahead of the subscription landing.
    pub async fn new(
        source_id: impl Into<String>,
        event_bus: EventBus,
        manager: ConstellationManager,
        device_manager: Arc<dyn DeviceManager>,
        synchronizer: ModificationSynchronizer,
        config: OrchestratorConfig,
    ) -> Self {
        event_bus
            .subscribe(Arc::new(synchronizer.clone()), synchronizer_filter())
            .await;
        Self {
            source_id: source_id.into(),
            event_bus,
            manager,
            synchronizer: std::sync::Mutex::new(synchronizer),
            device_manager: std::sync::Mutex::new(device_manager),
            config,
        }
    }

    /// Replaces the device manager this orchestrator dispatches through.
    pub fn set_device_manager(&self, device_manager: Arc<dyn DeviceManager>) {
        *self.device_manager.lock().unwrap() = device_manager;
    }

    /// Replaces the modification synchronizer and re-subscribes it to the
    /// event bus in place of the previous one.
    pub async fn set_synchronizer(&self, synchronizer: ModificationSynchronizer) {
        self.event_bus.unsubscribe("modification-synchronizer").await;
        self.event_bus
            .subscribe(Arc::new(synchronizer.clone()), synchronizer_filter())
            .await;
        *self.synchronizer.lock().unwrap() = synchronizer;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn manager(&self) -> &ConstellationManager {
        &self.manager
    }

    pub async fn list_available_devices(&self) -> OrchestrationResult<Vec<String>> {
        self.device_manager().list_connected().await
    }

    pub async fn get_status(&self, constellation_id: &str) -> Option<ConstellationStats> {
        self.manager.status(constellation_id).map(|c| c.stats())
    }

    fn device_manager(&self) -> Arc<dyn DeviceManager> {
        self.device_manager.lock().unwrap().clone()
    }

    fn synchronizer(&self) -> ModificationSynchronizer {
        self.synchronizer.lock().unwrap().clone()
    }

    async fn known_devices(&self) -> OrchestrationResult<Vec<DeviceInfo>> {
        let device_manager = self.device_manager();
        let ids = device_manager.list_connected().await?;
        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(info) = device_manager.get_info(&id).await? {
                devices.push(info);
            }
        }
        Ok(devices)
    }

    /// Prepares `constellation` for execution: validates the DAG, applies
    /// device assignments (verbatim if supplied, else via the manager and
    /// `strategy`), registers it, and publishes CONSTELLATION_STARTED.
    async fn prepare(
        &self,
        constellation: &mut Constellation,
        device_assignments: Option<&HashMap<String, String>>,
        strategy: AssignmentStrategy,
    ) -> OrchestrationResult<()> {
        let (ok, errors) = constellation.validate_dag();
        if !ok {
            let reason = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            self.publish_constellation_failed(constellation, reason.clone()).await;
            return Err(OrchestrationError::internal(format!(
                "constellation failed validation: {reason}"
            )));
        }

        if let Some(assignments) = device_assignments {
            for (task_id, device_id) in assignments {
                constellation.update_task(
                    task_id,
                    crate::constellation::TaskUpdate {
                        target_device_id: Some(device_id.clone()),
                        ..Default::default()
                    },
                )?;
            }
        } else {
            let devices = self.known_devices().await?;
            self.manager
                .assign_devices(constellation, strategy, &devices, None)?;
        }

        let (assignments_ok, missing) = self.manager.validate_assignments(constellation);
        if !assignments_ok {
            let reason = format!("{} task(s) missing device assignment", missing.len());
            self.publish_constellation_failed(constellation, reason.clone()).await;
            return Err(OrchestrationError::internal(reason));
        }

        constellation.start_execution();
        self.manager.register(
            constellation.clone(),
            Some(RegistrationMetadata {
                assignment_strategy: Some(strategy.to_string()),
                extra: Value::Null,
            }),
        );

        self.event_bus
            .publish(Event::Constellation(ConstellationEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type: EventType::ConstellationStarted,
                constellation_id: constellation.constellation_id.clone(),
                constellation_state: constellation.state,
                new_ready_tasks: Vec::new(),
                total_tasks: Some(constellation.tasks().count()),
                assignment_strategy: Some(strategy.to_string()),
                execution_duration_ms: None,
                reason: None,
                on_task_id: None,
                new_constellation: Some(constellation.clone()),
                modifications: None,
            }))
            .await;

        Ok(())
    }

    async fn publish_constellation_failed(&self, constellation: &Constellation, reason: String) {
        self.event_bus
            .publish(Event::Constellation(ConstellationEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type: EventType::ConstellationFailed,
                constellation_id: constellation.constellation_id.clone(),
                constellation_state: ConstellationState::Failed,
                new_ready_tasks: Vec::new(),
                total_tasks: Some(constellation.tasks().count()),
                assignment_strategy: None,
                execution_duration_ms: None,
                reason: Some(reason),
                on_task_id: None,
                new_constellation: None,
                modifications: None,
            }))
            .await;
    }

    async fn publish_task_started(&self, constellation_id: &str, task: &Task) {
        self.event_bus
            .publish(Event::Task(TaskEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type: EventType::TaskStarted,
                constellation_id: constellation_id.to_string(),
                task_id: task.task_id.clone(),
                status: TaskStatus::Running,
                result: None,
                error: None,
                newly_ready_tasks: Vec::new(),
                constellation_snapshot: None,
            }))
            .await;
    }

    async fn publish_task_outcome(
        &self,
        constellation: &Constellation,
        task_id: &str,
        success: bool,
        newly_ready: Vec<String>,
    ) {
        let task = constellation.task(task_id);
        let event_type = if success {
            EventType::TaskCompleted
        } else {
            EventType::TaskFailed
        };
        self.event_bus
            .publish(Event::Task(TaskEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type,
                constellation_id: constellation.constellation_id.clone(),
                task_id: task_id.to_string(),
                status: task.map(|t| t.status).unwrap_or(TaskStatus::Failed),
                result: task.and_then(|t| t.result.clone()),
                error: task.and_then(|t| t.error.clone()),
                newly_ready_tasks: newly_ready,
                constellation_snapshot: Some(constellation.clone()),
            }))
            .await;
    }

    /// Runs `task` through a single dispatch and returns its outcome. Does
    /// not touch `constellation` — the caller applies the result.
    async fn dispatch_one(
        device_manager: Arc<dyn DeviceManager>,
        task: Task,
        cancellation: CancellationToken,
    ) -> (String, OrchestrationResult<DispatchOutcome>) {
        let device_id = task
            .target_device_id
            .clone()
            .expect("dispatch_one called only on tasks with a device assignment");
        let outcome = device_manager.dispatch(&task, &device_id, cancellation).await;
        (task.task_id.clone(), outcome)
    }

    /// Runs the full scheduling loop for `constellation` until it completes
    /// or `cancellation` fires.
    pub async fn orchestrate(
        &self,
        mut constellation: Constellation,
        device_assignments: Option<HashMap<String, String>>,
        strategy: Option<AssignmentStrategy>,
        cancellation: Option<CancellationToken>,
    ) -> OrchestrationResult<OrchestrationOutcome> {
        let cancellation = cancellation.unwrap_or_default();
        let strategy = strategy.unwrap_or(AssignmentStrategy::RoundRobin);
        let started_at = Instant::now();

        self.prepare(&mut constellation, device_assignments.as_ref(), strategy)
            .await?;

        let mut in_flight: FuturesUnordered<
            tokio::task::JoinHandle<(String, OrchestrationResult<DispatchOutcome>)>,
        > = FuturesUnordered::new();
        let mut in_flight_ids: HashSet<String> = HashSet::new();
        let mut max_concurrent = 0usize;
        let mut cancelled = false;

        'scheduling: while !constellation.is_complete() {
            if cancellation.is_cancelled() {
                cancelled = true;
                break 'scheduling;
            }

            // 1. sync. Bounded by `sync_wait_timeout`, not left open-ended:
            // an edit cycle the planner never closes would otherwise stall
            // this pass for the synchronizer's full per-task
            // `modification_timeout` (600s default) before its own timeout
            // force-releases it.
            self.synchronizer()
                .wait_for_pending(Some(self.config.sync_wait_timeout))
                .await;
            constellation = self.synchronizer().merge(&constellation).await;

            // 2. re-validate assignments; planner edits may have added
            // tasks with no device yet.
            let unassigned: Vec<String> = constellation
                .tasks()
                .filter(|t| t.status.is_modifiable() && t.target_device_id.is_none())
                .map(|t| t.task_id.clone())
                .collect();
            if !unassigned.is_empty() {
                if self.config.auto_assign_missing_devices {
                    let devices = self.known_devices().await?;
                    self.manager
                        .assign_devices(&mut constellation, strategy, &devices, None)?;
                    debug!(count = unassigned.len(), "auto-assigned devices for planner-added tasks");
                } else {
                    let reason = format!(
                        "{} task(s) added by the planner have no device assignment",
                        unassigned.len()
                    );
                    self.publish_constellation_failed(&constellation, reason.clone()).await;
                    return Err(OrchestrationError::internal(reason));
                }
            }

            // 3. dispatch ready tasks
            for task in constellation.get_ready_tasks() {
                if in_flight_ids.contains(&task.task_id) {
                    continue;
                }
                constellation.start_task(&task.task_id)?;
                self.publish_task_started(&constellation.constellation_id, &task)
                    .await;

                in_flight_ids.insert(task.task_id.clone());
                let device_manager = self.device_manager();
                let dispatch_task = constellation
                    .task(&task.task_id)
                    .cloned()
                    .expect("just started this task");
                let dispatch_cancellation = cancellation.clone();
                in_flight.push(tokio::spawn(Self::dispatch_one(
                    device_manager,
                    dispatch_task,
                    dispatch_cancellation,
                )));
            }
            max_concurrent = max_concurrent.max(in_flight_ids.len());

            // 4. await progress
            if in_flight.is_empty() {
                tokio::time::sleep(self.config.idle_poll_interval).await;
                continue;
            }

            tokio::select! {
                _ = cancellation.cancelled() => {
                    cancelled = true;
                    break 'scheduling;
                }
                joined = in_flight.next() => {
                    let Some(joined) = joined else { continue 'scheduling };
                    let (task_id, outcome) = match joined {
                        Ok(pair) => pair,
                        Err(join_err) => {
                            warn!(error = %join_err, "dispatch task panicked; treating as failure");
                            continue 'scheduling;
                        }
                    };
                    in_flight_ids.remove(&task_id);
                    self.reap_one(&mut constellation, &task_id, outcome).await?;
                }
            }
        }

        if cancelled {
            while let Some(joined) = in_flight.next().await {
                if let Ok((task_id, _)) = joined {
                    in_flight_ids.remove(&task_id);
                }
            }
            info!(
                constellation_id = %constellation.constellation_id,
                "orchestration cancelled; no CONSTELLATION_COMPLETED published"
            );
            self.manager.update_registered(constellation.clone());
            return Ok(OrchestrationOutcome {
                constellation_id: constellation.constellation_id.clone(),
                final_state: constellation.state,
                task_results: task_results(&constellation),
                total_tasks: constellation.tasks().count(),
                stats: constellation.stats(),
                max_concurrent_dispatches: max_concurrent,
                execution_duration: started_at.elapsed(),
                cancelled: true,
            });
        }

        // Drain any stragglers so we never report completion with
        // still-outstanding dispatches (should be empty by construction,
        // since `is_complete` only holds once every dispatch was reaped).
        while let Some(joined) = in_flight.next().await {
            if let Ok((task_id, outcome)) = joined {
                in_flight_ids.remove(&task_id);
                self.reap_one(&mut constellation, &task_id, outcome).await?;
            }
        }

        // Normally already current: `mark_task_completed` recomputes state on
        // every reap. An empty constellation never calls it, so pin the
        // final state here rather than leaving it at `start_execution`'s
        // EXECUTING.
        constellation.recompute_state();

        let duration = started_at.elapsed();
        self.manager.update_registered(constellation.clone());

        self.event_bus
            .publish(Event::Constellation(ConstellationEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type: EventType::ConstellationCompleted,
                constellation_id: constellation.constellation_id.clone(),
                constellation_state: constellation.state,
                new_ready_tasks: Vec::new(),
                total_tasks: Some(constellation.tasks().count()),
                assignment_strategy: Some(strategy.to_string()),
                execution_duration_ms: Some(duration.as_millis() as u64),
                reason: None,
                on_task_id: None,
                new_constellation: Some(constellation.clone()),
                modifications: None,
            }))
            .await;

        Ok(OrchestrationOutcome {
            constellation_id: constellation.constellation_id.clone(),
            final_state: constellation.state,
            task_results: task_results(&constellation),
            total_tasks: constellation.tasks().count(),
            stats: constellation.stats(),
            max_concurrent_dispatches: max_concurrent,
            execution_duration: duration,
            cancelled: false,
        })
    }

    async fn reap_one(
        &self,
        constellation: &mut Constellation,
        task_id: &str,
        outcome: OrchestrationResult<DispatchOutcome>,
    ) -> OrchestrationResult<()> {
        let (success, payload) = match outcome {
            Ok(outcome) if outcome.success => {
                (true, outcome.result.unwrap_or(Value::Null))
            }
            Ok(outcome) => (
                false,
                Value::String(outcome.error.unwrap_or_else(|| "dispatch failed".to_string())),
            ),
            Err(err) => (false, Value::String(err.to_string())),
        };

        let newly_ready = constellation.mark_task_completed(task_id, success, payload)?;
        self.publish_task_outcome(constellation, task_id, success, newly_ready)
            .await;
        Ok(())
    }

    /// A stand-alone dispatch without a surrounding constellation: runs the
    /// same per-task sequence (TASK_STARTED, dispatch, TASK_COMPLETED/FAILED)
    /// on a single task.
    pub async fn execute_single(
        &self,
        mut task: Task,
        device_id: Option<String>,
    ) -> OrchestrationResult<DispatchOutcome> {
        if let Some(device_id) = device_id {
            task.target_device_id = Some(device_id);
        }
        let device_id = task
            .target_device_id
            .clone()
            .ok_or_else(|| OrchestrationError::missing_device_assignment(task.task_id.clone()))?;

        task.status = TaskStatus::Running;
        task.execution_start_time = Some(chrono::Utc::now());

        self.event_bus
            .publish(Event::Task(TaskEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type: EventType::TaskStarted,
                constellation_id: "standalone".to_string(),
                task_id: task.task_id.clone(),
                status: TaskStatus::Running,
                result: None,
                error: None,
                newly_ready_tasks: Vec::new(),
                constellation_snapshot: None,
            }))
            .await;

        let outcome = self
            .device_manager()
            .dispatch(&task, &device_id, CancellationToken::new())
            .await;

        let (event_type, status, result, error) = match &outcome {
            Ok(o) if o.success => (EventType::TaskCompleted, TaskStatus::Completed, o.result.clone(), None),
            Ok(o) => (
                EventType::TaskFailed,
                TaskStatus::Failed,
                None,
                Some(o.error.clone().unwrap_or_else(|| "dispatch failed".to_string())),
            ),
            Err(err) => (EventType::TaskFailed, TaskStatus::Failed, None, Some(err.to_string())),
        };

        self.event_bus
            .publish(Event::Task(TaskEvent {
                envelope: EventEnvelope::new(self.source_id.clone()),
                event_type,
                constellation_id: "standalone".to_string(),
                task_id: task.task_id.clone(),
                status,
                result,
                error,
                newly_ready_tasks: Vec::new(),
                constellation_snapshot: None,
            }))
            .await;

        outcome
    }
}

fn task_results(constellation: &Constellation) -> HashMap<String, TaskResult> {
    constellation
        .tasks()
        .map(|t| {
            (
                t.task_id.clone(),
                TaskResult {
                    status: t.status,
                    result: t.result.clone(),
                    error: t.error.clone(),
                },
            )
        })
        .collect()
}
