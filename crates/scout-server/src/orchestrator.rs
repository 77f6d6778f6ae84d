//! Research orchestrator: connects the task graph runner to the server.
//!
//! The `ResearchOrchestrator` trait defines starting, aborting and inspecting
//! runs. `EngineOrchestrator` is the production implementation. It owns each
//! session's lifecycle: the session is opened before any other work and is
//! closed with `DONE` on every exit path, including panics inside the run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use scout_core::events::EventType;
use scout_core::ids::{SessionId, WorkspaceId};
use scout_engine::error::EngineError;
use scout_engine::event_bus::EventBus;
use scout_engine::executor::{RetryPolicy, ToolExecutor};
use scout_engine::runner::{PhaseTracker, RunPhase, RunSummary, RunnerConfig, TaskGraphRunner};
use scout_engine::tools::create_research_tool;
use scout_settings::ScoutSettings;
use scout_store::{Database, DocumentRepo, StoreWorkspaceSource, WorkspaceRepo};

/// Result of accepting a start request.
#[derive(Debug, Clone, Serialize)]
pub struct StartResult {
    pub status: String,
    pub workspace_id: WorkspaceId,
}

/// Current orchestration state for a workspace.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub is_running: bool,
    pub phase: RunPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl RunState {
    pub fn idle() -> Self {
        Self {
            is_running: false,
            phase: RunPhase::Init,
            started_at: None,
        }
    }
}

/// Trait for orchestrating research runs.
#[async_trait]
pub trait ResearchOrchestrator: Send + Sync {
    async fn start(&self, workspace_id: &WorkspaceId) -> Result<StartResult, EngineError>;
    fn abort(&self, workspace_id: &WorkspaceId) -> bool;
    fn state(&self, workspace_id: &WorkspaceId) -> RunState;
    fn abort_all(&self) -> usize;
}

/// Tracks an active run.
struct ActiveRun {
    run_id: String,
    cancel: CancellationToken,
    phase: PhaseTracker,
    started_at: String,
}

/// Production orchestrator backed by the engine crate.
pub struct EngineOrchestrator {
    bus: Arc<EventBus>,
    runner: Arc<TaskGraphRunner>,
    active_runs: Arc<DashMap<WorkspaceId, ActiveRun>>,
}

impl EngineOrchestrator {
    pub fn new(runner: TaskGraphRunner) -> Self {
        Self {
            bus: Arc::clone(runner.bus()),
            runner: Arc::new(runner),
            active_runs: Arc::new(DashMap::new()),
        }
    }

    /// Wire the store-backed workspace source, the configured research tool
    /// and the retry policy from settings.
    pub fn from_settings(settings: &ScoutSettings, db: &Database, bus: Arc<EventBus>) -> Self {
        let source = StoreWorkspaceSource::new(WorkspaceRepo::new(db.clone()));
        let tool = create_research_tool(&settings.search, DocumentRepo::new(db.clone()));
        let executor = ToolExecutor::new(
            tool,
            RetryPolicy::from_settings(&settings.retry),
            Duration::from_millis(settings.orchestration.tool_timeout_ms),
        );
        let runner = TaskGraphRunner::new(
            bus,
            Arc::new(source),
            Arc::new(executor),
            RunnerConfig::from_settings(&settings.orchestration),
        );
        Self::new(runner)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn active_count(&self) -> usize {
        self.active_runs.len()
    }

    /// Run a workspace to completion on the current task.
    ///
    /// Every outcome reaches subscribers as events ending in `DONE`; the
    /// returned result is for in-process callers.
    pub async fn run(&self, workspace_id: &WorkspaceId) -> Result<RunSummary, EngineError> {
        let (run_id, cancel, phase) = self.register(workspace_id)?;
        let result = drive(&self.bus, &self.runner, workspace_id, &cancel, &phase).await;
        release(&self.active_runs, workspace_id, &run_id);
        result
    }

    fn register(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<(String, CancellationToken, PhaseTracker), EngineError> {
        match self.active_runs.entry(workspace_id.clone()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyRunning(workspace_id.clone())),
            Entry::Vacant(slot) => {
                let run = ActiveRun {
                    run_id: uuid::Uuid::now_v7().to_string(),
                    cancel: CancellationToken::new(),
                    phase: PhaseTracker::new(),
                    started_at: Utc::now().to_rfc3339(),
                };
                let handles = (run.run_id.clone(), run.cancel.clone(), run.phase.clone());
                slot.insert(run);
                Ok(handles)
            }
        }
    }
}

#[async_trait]
impl ResearchOrchestrator for EngineOrchestrator {
    async fn start(&self, workspace_id: &WorkspaceId) -> Result<StartResult, EngineError> {
        let (run_id, cancel, phase) = self.register(workspace_id)?;

        let bus = Arc::clone(&self.bus);
        let runner = Arc::clone(&self.runner);
        let active_runs = Arc::clone(&self.active_runs);
        let id = workspace_id.clone();

        tokio::spawn(async move {
            match drive(&bus, &runner, &id, &cancel, &phase).await {
                Ok(summary) => tracing::info!(
                    workspace_id = %id,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    "orchestration finished"
                ),
                // Already published to the session and logged by `drive`.
                Err(e) => tracing::debug!(workspace_id = %id, kind = e.kind(), "orchestration task ended"),
            }
            release(&active_runs, &id, &run_id);
        });

        tracing::info!(workspace_id = %workspace_id, "orchestration started");
        Ok(StartResult {
            status: "started".into(),
            workspace_id: workspace_id.clone(),
        })
    }

    fn abort(&self, workspace_id: &WorkspaceId) -> bool {
        match self.active_runs.get(workspace_id) {
            Some(run) => {
                run.cancel.cancel();
                tracing::info!(workspace_id = %workspace_id, "orchestration abort requested");
                true
            }
            None => false,
        }
    }

    fn state(&self, workspace_id: &WorkspaceId) -> RunState {
        match self.active_runs.get(workspace_id) {
            Some(run) => RunState {
                is_running: true,
                phase: run.phase.get(),
                started_at: Some(run.started_at.clone()),
            },
            None => RunState::idle(),
        }
    }

    fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active_runs.iter() {
            entry.value().cancel.cancel();
            count += 1;
        }
        count
    }
}

/// One full session lifecycle: open, run under panic capture, report a
/// failure as a single `error` event, close.
async fn drive(
    bus: &Arc<EventBus>,
    runner: &TaskGraphRunner,
    workspace_id: &WorkspaceId,
    cancel: &CancellationToken,
    phase: &PhaseTracker,
) -> Result<RunSummary, EngineError> {
    let session_id = SessionId::for_workspace(workspace_id);
    let session = bus.open_session(&session_id);

    let result = match AssertUnwindSafe(runner.run(workspace_id, cancel, phase))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(EngineError::Internal(format!(
            "Orchestration failed unexpectedly: {}",
            panic_message(panic.as_ref())
        ))),
    };

    if let Err(ref e) = result {
        phase.set(RunPhase::Error);
        match e {
            EngineError::Cancelled | EngineError::WorkspaceNotFound(_) => {
                tracing::info!(session_id = %session_id, error = %e, "orchestration ended early");
            }
            _ => tracing::error!(session_id = %session_id, error = %e, "orchestration failed"),
        }
        bus.publish(
            &session_id,
            EventType::Error,
            serde_json::json!({ "message": e.to_string(), "kind": e.kind() }),
        );
    }

    session.close();
    result
}

fn release(active_runs: &DashMap<WorkspaceId, ActiveRun>, workspace_id: &WorkspaceId, run_id: &str) {
    active_runs.remove_if(workspace_id, |_, run| run.run_id == run_id);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
