//! Integration coverage for the six literal end-to-end scenarios in spec §8,
//! run against the real `Orchestrator` + `EventBus` + `ModificationSynchronizer`
//! wiring rather than any single component in isolation.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use constellation_orchestrator::{
    AssignmentStrategy, Constellation, ConstellationManager, ConstellationState, Dependency,
    Event, EventBus, EventObserver, EventType, ModificationSynchronizer, Orchestrator,
    OrchestratorConfig, SynchronizerConfig, Task, TaskStatus,
};

use support::{EventRecorder, InMemoryDeviceManager, Recorded};

fn linear_chain(devices: &[&str]) -> Constellation {
    let device = devices.first().copied().unwrap_or("d1");
    let mut c = Constellation::new("c1", "chain");
    c.add_task(Task::new("a", "A").with_target_device(device)).unwrap();
    c.add_task(Task::new("b", "B").with_target_device(device)).unwrap();
    c.add_task(Task::new("c", "C").with_target_device(device)).unwrap();
    c.add_dependency(Dependency::new("ab", "a", "b")).unwrap();
    c.add_dependency(Dependency::new("bc", "b", "c")).unwrap();
    c
}

/// Signals once via a one-shot channel the first time a matching event is observed.
struct OneShotSignal {
    matches: Box<dyn Fn(&Event) -> bool + Send + Sync>,
    tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl OneShotSignal {
    fn new(
        matches: impl Fn(&Event) -> bool + Send + Sync + 'static,
    ) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                matches: Box::new(matches),
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

#[async_trait]
impl EventObserver for OneShotSignal {
    fn id(&self) -> String {
        "one-shot-signal".to_string()
    }

    async fn on_event(&self, event: &Event) {
        if (self.matches)(event) {
            if let Some(tx) = self.tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }
    }
}

fn task_completed(task_id: &str) -> impl Fn(&Event) -> bool + Send + Sync + 'static {
    let task_id = task_id.to_string();
    move |event: &Event| {
        matches!(event.as_task_event(), Some(e) if e.event_type == EventType::TaskCompleted && e.task_id == task_id)
    }
}

// Scenario 1: linear chain runs strictly sequentially.
#[tokio::test]
async fn scenario_1_linear_chain() {
    let device_manager = Arc::new(InMemoryDeviceManager::new(["d1"]));
    let event_bus = EventBus::new("orch-1");
    let recorder = Arc::new(EventRecorder::new());
    event_bus
        .subscribe(recorder.clone(), constellation_orchestrator::SubscriptionFilter::All)
        .await;

    let orchestrator = Orchestrator::new(
        "orch-1",
        event_bus,
        ConstellationManager::new(),
        device_manager,
        ModificationSynchronizer::new(SynchronizerConfig::default()),
        OrchestratorConfig::default(),
    )
    .await;

    let outcome = orchestrator
        .orchestrate(linear_chain(&["d1"]), None, Some(AssignmentStrategy::RoundRobin), None)
        .await
        .unwrap();

    assert_eq!(outcome.final_state, ConstellationState::Completed);

    let log = recorder.log();
    assert_eq!(
        log,
        vec![
            Recorded::ConstellationStarted,
            Recorded::TaskStarted("a".into()),
            Recorded::TaskCompleted("a".into()),
            Recorded::TaskStarted("b".into()),
            Recorded::TaskCompleted("b".into()),
            Recorded::TaskStarted("c".into()),
            Recorded::TaskCompleted("c".into()),
            Recorded::ConstellationCompleted,
        ]
    );
}

// Scenario 2: diamond — B and C run concurrently, D only after both finish.
#[tokio::test]
async fn scenario_2_diamond() {
    let mut c = Constellation::new("c1", "diamond");
    for id in ["a", "b", "c", "d"] {
        c.add_task(Task::new(id, id)).unwrap();
    }
    c.add_dependency(Dependency::new("ab", "a", "b")).unwrap();
    c.add_dependency(Dependency::new("ac", "a", "c")).unwrap();
    c.add_dependency(Dependency::new("bd", "b", "d")).unwrap();
    c.add_dependency(Dependency::new("cd", "c", "d")).unwrap();

    let device_manager = Arc::new(InMemoryDeviceManager::new(["d1", "d2"]));
    device_manager.script_task(
        "b",
        support::ScriptedResponse::Delayed(
            Duration::from_millis(40),
            Box::new(support::ScriptedResponse::Success(serde_json::json!({}))),
        ),
    );
    device_manager.script_task(
        "c",
        support::ScriptedResponse::Delayed(
            Duration::from_millis(40),
            Box::new(support::ScriptedResponse::Success(serde_json::json!({}))),
        ),
    );

    let event_bus = EventBus::new("orch-1");
    let recorder = Arc::new(EventRecorder::new());
    event_bus
        .subscribe(recorder.clone(), constellation_orchestrator::SubscriptionFilter::All)
        .await;

    let orchestrator = Orchestrator::new(
        "orch-1",
        event_bus,
        ConstellationManager::new(),
        device_manager,
        ModificationSynchronizer::new(SynchronizerConfig::default()),
        OrchestratorConfig::default(),
    )
    .await;

    let outcome = orchestrator
        .orchestrate(c, None, Some(AssignmentStrategy::RoundRobin), None)
        .await
        .unwrap();

    assert_eq!(outcome.final_state, ConstellationState::Completed);

    let log = recorder.log();
    let pos = |r: &Recorded| log.iter().position(|x| x == r).unwrap();
    let b_started = pos(&Recorded::TaskStarted("b".into()));
    let c_started = pos(&Recorded::TaskStarted("c".into()));
    let b_completed = pos(&Recorded::TaskCompleted("b".into()));
    let c_completed = pos(&Recorded::TaskCompleted("c".into()));
    let d_started = pos(&Recorded::TaskStarted("d".into()));

    // Both B and C started before either completed.
    assert!(b_started < b_completed);
    assert!(c_started < c_completed);
    assert!(b_started < c_completed);
    assert!(c_started < b_completed);
    // D only starts after both B and C have completed.
    assert!(d_started > b_completed);
    assert!(d_started > c_completed);
}

// Scenario 3: adding an edge that would close a cycle is rejected; the
// constellation is left untouched and still validates.
#[test]
fn scenario_3_cycle_rejection() {
    let mut c = Constellation::new("c1", "pair");
    c.add_task(Task::new("a", "A")).unwrap();
    c.add_task(Task::new("b", "B")).unwrap();
    c.add_dependency(Dependency::new("ab", "a", "b")).unwrap();

    let err = c.add_dependency(Dependency::new("ba", "b", "a")).unwrap_err();
    assert!(matches!(
        err,
        constellation_orchestrator::OrchestrationError::CycleDetected { .. }
    ));

    assert!(c.dependency("ba").is_none());
    let (ok, errors) = c.validate_dag();
    assert!(ok);
    assert!(errors.is_empty());
}

// Scenario 4: concurrent edit — the planner replaces B with B' and adds C
// right after A completes. B must never start; B' and C must.
#[tokio::test]
async fn scenario_4_concurrent_edit() {
    let device_manager = Arc::new(InMemoryDeviceManager::new(["d1"]));
    let event_bus = EventBus::new("orch-1");
    let recorder = Arc::new(EventRecorder::new());
    event_bus
        .subscribe(recorder.clone(), constellation_orchestrator::SubscriptionFilter::All)
        .await;

    let (signal, rx) = OneShotSignal::new(task_completed("a"));
    event_bus
        .subscribe(
            signal,
            constellation_orchestrator::SubscriptionFilter::Types(
                [EventType::TaskCompleted].into_iter().collect(),
            ),
        )
        .await;

    let orchestrator = Orchestrator::new(
        "orch-1",
        event_bus.clone(),
        ConstellationManager::new(),
        device_manager,
        ModificationSynchronizer::new(SynchronizerConfig::default()),
        OrchestratorConfig::default(),
    )
    .await;

    let mut constellation = Constellation::new("c1", "chain");
    constellation.add_task(Task::new("a", "A").with_target_device("d1")).unwrap();
    constellation.add_task(Task::new("b", "B").with_target_device("d1")).unwrap();
    constellation.add_dependency(Dependency::new("ab", "a", "b")).unwrap();

    let orchestrate_handle = tokio::spawn(async move {
        orchestrator
            .orchestrate(constellation, None, Some(AssignmentStrategy::RoundRobin), None)
            .await
    });

    rx.await.unwrap();
    // Let the synchronizer's own TASK_COMPLETED observer register the
    // pending edit cycle before we close it.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut planner_view = Constellation::new("c1", "chain");
    planner_view.add_task(Task::new("a", "A").with_target_device("d1")).unwrap();
    planner_view.start_task("a").unwrap();
    planner_view
        .mark_task_completed("a", true, serde_json::json!({}))
        .unwrap();
    planner_view
        .add_task(Task::new("b_prime", "B replacement").with_target_device("d1"))
        .unwrap();
    planner_view.add_task(Task::new("c", "C").with_target_device("d1")).unwrap();
    planner_view
        .add_dependency(Dependency::new("b_prime_c", "b_prime", "c"))
        .unwrap();

    event_bus
        .publish(support::modified_event("planner", vec!["a".to_string()], planner_view))
        .await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), orchestrate_handle)
        .await
        .expect("orchestration did not complete")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.final_state, ConstellationState::Completed);
    assert!(outcome.task_results.get("b").is_none());
    assert_eq!(outcome.task_results["b_prime"].status, TaskStatus::Completed);
    assert_eq!(outcome.task_results["c"].status, TaskStatus::Completed);

    let log = recorder.log();
    assert!(!log.contains(&Recorded::TaskStarted("b".into())));
    let b_prime_started = log
        .iter()
        .position(|r| *r == Recorded::TaskStarted("b_prime".into()))
        .unwrap();
    let c_started = log
        .iter()
        .position(|r| *r == Recorded::TaskStarted("c".into()))
        .unwrap();
    assert!(b_prime_started < c_started);
}

// Scenario 5: the planner's CONSTELLATION_MODIFIED snapshot is stale (still
// shows A as RUNNING) by the time it arrives; the scheduler's own more
// advanced status for A must survive the merge, and B must still become
// ready off the back of it.
#[tokio::test]
async fn scenario_5_stale_snapshot_preserves_progress() {
    let device_manager = Arc::new(InMemoryDeviceManager::new(["d1", "d2"]));
    device_manager.script_task(
        "a",
        support::ScriptedResponse::Delayed(
            Duration::from_millis(30),
            Box::new(support::ScriptedResponse::Success(serde_json::json!({}))),
        ),
    );

    let event_bus = EventBus::new("orch-1");
    let recorder = Arc::new(EventRecorder::new());
    event_bus
        .subscribe(recorder.clone(), constellation_orchestrator::SubscriptionFilter::All)
        .await;

    let (completed_signal, completed_rx) = OneShotSignal::new(task_completed("a"));
    event_bus
        .subscribe(
            completed_signal,
            constellation_orchestrator::SubscriptionFilter::Types(
                [EventType::TaskCompleted].into_iter().collect(),
            ),
        )
        .await;

    let orchestrator = Orchestrator::new(
        "orch-1",
        event_bus.clone(),
        ConstellationManager::new(),
        device_manager,
        ModificationSynchronizer::new(SynchronizerConfig::default()),
        OrchestratorConfig::default(),
    )
    .await;

    let mut constellation = Constellation::new("c1", "chain");
    constellation.add_task(Task::new("a", "A").with_target_device("d1")).unwrap();
    constellation.add_task(Task::new("b", "B").with_target_device("d2")).unwrap();
    constellation.add_dependency(Dependency::new("ab", "a", "b")).unwrap();

    let orchestrate_handle = tokio::spawn(async move {
        orchestrator
            .orchestrate(constellation, None, Some(AssignmentStrategy::RoundRobin), None)
            .await
    });

    completed_rx.await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The planner's stale snapshot, taken while A was still RUNNING.
    let mut stale_view = Constellation::new("c1", "chain");
    stale_view.add_task(Task::new("a", "A").with_target_device("d1")).unwrap();
    stale_view.add_task(Task::new("b", "B").with_target_device("d2")).unwrap();
    stale_view.add_dependency(Dependency::new("ab", "a", "b")).unwrap();
    stale_view.start_task("a").unwrap();
    assert_eq!(stale_view.task("a").unwrap().status, TaskStatus::Running);

    event_bus
        .publish(support::modified_event("planner", vec!["a".to_string()], stale_view))
        .await;

    let outcome = tokio::time::timeout(Duration::from_secs(5), orchestrate_handle)
        .await
        .expect("orchestration did not complete")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.final_state, ConstellationState::Completed);
    assert_eq!(outcome.task_results["a"].status, TaskStatus::Completed);
    assert_eq!(outcome.task_results["b"].status, TaskStatus::Completed);

    let log = recorder.log();
    let a_completed = log.iter().position(|r| *r == Recorded::TaskCompleted("a".into())).unwrap();
    let b_started = log.iter().position(|r| *r == Recorded::TaskStarted("b".into())).unwrap();
    assert!(b_started > a_completed);
}

// Scenario 6: the planner never responds; the synchronizer's per-task
// timeout force-releases the edit cycle and the scheduling loop advances
// without ever seeing a CONSTELLATION_MODIFIED event.
#[tokio::test]
async fn scenario_6_lock_timeout_liveness() {
    let device_manager = Arc::new(InMemoryDeviceManager::new(["d1"]));
    let synchronizer = ModificationSynchronizer::new(SynchronizerConfig {
        modification_timeout: Duration::from_millis(80),
    });

    let orchestrator = Orchestrator::new(
        "orch-1",
        EventBus::new("orch-1"),
        ConstellationManager::new(),
        device_manager,
        synchronizer,
        OrchestratorConfig::default(),
    )
    .await;

    let mut constellation = Constellation::new("c1", "chain");
    constellation.add_task(Task::new("a", "A").with_target_device("d1")).unwrap();
    constellation.add_task(Task::new("b", "B").with_target_device("d1")).unwrap();
    constellation.add_dependency(Dependency::new("ab", "a", "b")).unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_secs(3),
        orchestrator.orchestrate(constellation, None, Some(AssignmentStrategy::RoundRobin), None),
    )
    .await
    .expect("scheduling loop never advanced past the stalled lock")
    .unwrap();

    assert_eq!(outcome.final_state, ConstellationState::Completed);
    assert_eq!(outcome.task_results["a"].status, TaskStatus::Completed);
    assert_eq!(outcome.task_results["b"].status, TaskStatus::Completed);
}
