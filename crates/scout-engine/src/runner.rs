//! Expands a workspace's domain/query tree into tool executions.
//!
//! Event order for a run is fixed by the tree: one opening `status`, then for
//! each domain a `thought`, and for each of its queries a rationale `thought`
//! followed by the executor's `tool_call` and `tool_result` (or one `error`).
//! A closing `status` and a synthesis `thought` end the run. With
//! `max_concurrent_domains > 1` domains execute together, but each writes
//! into its own buffer and the buffers are published in domain order, so a
//! subscriber observes exactly the sequential order.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use scout_core::errors::ToolError;
use scout_core::events::EventType;
use scout_core::ids::{SessionId, WorkspaceId};
use scout_core::research::WorkspaceSource;
use scout_core::workspace::{Domain, Workspace};
use scout_settings::OrchestrationSettings;

use crate::error::EngineError;
use crate::event_bus::EventBus;
use crate::executor::{Emitter, ToolExecutor};

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Domains processed at once. `1` runs them one after another.
    pub max_concurrent_domains: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_domains: 1,
        }
    }
}

impl RunnerConfig {
    pub fn from_settings(settings: &OrchestrationSettings) -> Self {
        Self {
            max_concurrent_domains: settings.max_concurrent_domains.max(1),
        }
    }
}

/// Where a run currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RunPhase {
    #[default]
    Init,
    Loading,
    Domain {
        index: usize,
    },
    Query {
        domain: usize,
        query: usize,
    },
    SynthesisReady,
    Done,
    Error,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::Loading => f.write_str("loading"),
            Self::Domain { index } => write!(f, "domain:{index}"),
            Self::Query { domain, query } => write!(f, "query:{domain}:{query}"),
            Self::SynthesisReady => f.write_str("synthesis_ready"),
            Self::Done => f.write_str("done"),
            Self::Error => f.write_str("error"),
        }
    }
}

impl Serialize for RunPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Shared view of a run's phase.
///
/// Once `Error` is recorded later transitions are ignored.
#[derive(Clone, Default)]
pub struct PhaseTracker(Arc<Mutex<RunPhase>>);

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> RunPhase {
        *self.0.lock()
    }

    pub fn set(&self, phase: RunPhase) {
        let mut current = self.0.lock();
        if *current != RunPhase::Error {
            *current = phase;
        }
    }
}

/// Outcome counts for a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub domains: usize,
    pub queries: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, Default)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn merge(mut self, other: Tally) -> Tally {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self
    }
}

pub struct TaskGraphRunner {
    bus: Arc<EventBus>,
    source: Arc<dyn WorkspaceSource>,
    executor: Arc<ToolExecutor>,
    config: RunnerConfig,
}

impl TaskGraphRunner {
    pub fn new(
        bus: Arc<EventBus>,
        source: Arc<dyn WorkspaceSource>,
        executor: Arc<ToolExecutor>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            bus,
            source,
            executor,
            config,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Drive one workspace's task graph to completion.
    ///
    /// Publishes into the session keyed by `workspace_id` but never opens or
    /// closes it. A missing workspace returns `WorkspaceNotFound` before any
    /// event is published.
    pub async fn run(
        &self,
        workspace_id: &WorkspaceId,
        cancel: &CancellationToken,
        phase: &PhaseTracker,
    ) -> Result<RunSummary, EngineError> {
        let session_id = SessionId::for_workspace(workspace_id);
        let span = info_span!("run", session_id = %session_id);
        let result = self
            .run_graph(workspace_id, &session_id, cancel, phase)
            .instrument(span)
            .await;
        if result.is_err() {
            phase.set(RunPhase::Error);
        }
        result
    }

    async fn run_graph(
        &self,
        workspace_id: &WorkspaceId,
        session_id: &SessionId,
        cancel: &CancellationToken,
        phase: &PhaseTracker,
    ) -> Result<RunSummary, EngineError> {
        phase.set(RunPhase::Loading);
        let loaded = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            loaded = self.source.get_workspace(workspace_id) => loaded?,
        };
        let workspace =
            loaded.ok_or_else(|| EngineError::WorkspaceNotFound(workspace_id.clone()))?;

        let domain_count = workspace.domains.len();
        let query_count = workspace.total_queries();
        info!(domain_count, query_count, "starting task graph");

        let emitter = Emitter::bus(Arc::clone(&self.bus), session_id.clone());
        emitter.emit(
            EventType::Status,
            json!({
                "message": format!("Planner initialized. Loading {domain_count} domains..."),
                "domain_count": domain_count,
                "query_count": query_count,
            }),
        );

        let tally = if self.config.max_concurrent_domains > 1 && domain_count > 1 {
            self.run_concurrent(&workspace, session_id, &emitter, cancel, phase)
                .await?
        } else {
            let mut tally = Tally::default();
            for (index, domain) in workspace.domains.iter().enumerate() {
                let domain_tally = self
                    .run_domain(&emitter, session_id, index, domain, cancel, phase)
                    .await?;
                tally = tally.merge(domain_tally);
            }
            tally
        };

        phase.set(RunPhase::SynthesisReady);
        emitter.emit(
            EventType::Status,
            json!({
                "message": "All subtask searches completed. Knowledge index hydrated.",
                "succeeded": tally.succeeded,
                "failed": tally.failed,
            }),
        );
        emitter.emit(
            EventType::Thought,
            json!({ "message": "Transitioning to synthesis phase." }),
        );
        phase.set(RunPhase::Done);

        let summary = RunSummary {
            domains: domain_count,
            queries: query_count,
            succeeded: tally.succeeded,
            failed: tally.failed,
        };
        info!(succeeded = summary.succeeded, failed = summary.failed, "task graph complete");
        Ok(summary)
    }

    /// Run domains under a concurrency limit while a forwarder publishes
    /// their buffered events strictly in domain order.
    async fn run_concurrent(
        &self,
        workspace: &Workspace,
        session_id: &SessionId,
        direct: &Emitter,
        cancel: &CancellationToken,
        phase: &PhaseTracker,
    ) -> Result<Tally, EngineError> {
        let mut buffers = Vec::with_capacity(workspace.domains.len());
        let mut jobs = Vec::with_capacity(workspace.domains.len());
        for index in 0..workspace.domains.len() {
            let (tx, rx) = mpsc::unbounded_channel();
            buffers.push(rx);
            jobs.push((index, Emitter::Buffer(tx)));
        }

        let workers = stream::iter(jobs)
            .map(|(index, emitter)| async move {
                let domain = &workspace.domains[index];
                self.run_domain(&emitter, session_id, index, domain, cancel, phase)
                    .await
            })
            .buffer_unordered(self.config.max_concurrent_domains)
            .try_fold(Tally::default(), |acc, tally| async move {
                Ok::<_, EngineError>(acc.merge(tally))
            });

        let forwarder = async {
            for mut buffer in buffers {
                while let Some((event_type, payload)) = buffer.recv().await {
                    direct.emit(event_type, payload);
                }
            }
        };

        let (result, ()) = tokio::join!(workers, forwarder);
        result
    }

    async fn run_domain(
        &self,
        emitter: &Emitter,
        session_id: &SessionId,
        index: usize,
        domain: &Domain,
        cancel: &CancellationToken,
        phase: &PhaseTracker,
    ) -> Result<Tally, EngineError> {
        let span = info_span!("domain", domain_id = %domain.id, index);
        async {
            phase.set(RunPhase::Domain { index });
            emitter.emit(
                EventType::Thought,
                json!({
                    "message": format!("Analyzing domain {}...", domain.name),
                    "domain_id": domain.id,
                }),
            );

            let mut tally = Tally::default();
            for (query_index, query) in domain.queries.iter().enumerate() {
                if cancel.is_cancelled() {
                    return Err(EngineError::Cancelled);
                }
                phase.set(RunPhase::Query {
                    domain: index,
                    query: query_index,
                });
                emitter.emit(
                    EventType::Thought,
                    json!({
                        "message": format!("Dispatching worker for rationale: {}", query.rationale),
                        "rationale": query.rationale,
                        "query": query.query,
                    }),
                );

                match self
                    .executor
                    .execute(emitter, session_id, &domain.id, &query.query, cancel)
                    .await
                {
                    Ok(_) => tally.succeeded += 1,
                    Err(ToolError::Cancelled) => return Err(EngineError::Cancelled),
                    Err(e) => {
                        tally.failed += 1;
                        warn!(query = %query.query, error = %e, "query failed, continuing");
                        let error = EngineError::Tool(e);
                        emitter.emit(
                            EventType::Error,
                            json!({
                                "message": format!("Research failed for \"{}\": {error}", query.query),
                                "kind": error.kind(),
                                "domain_id": domain.id,
                                "query": query.query,
                            }),
                        );
                    }
                }
            }
            Ok(tally)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RetryPolicy;
    use crate::testing::{MockOutcome, MockResearchTool, StaticWorkspaceSource};
    use scout_core::events::OrchestrationEvent;
    use std::time::Duration;

    struct Harness {
        bus: Arc<EventBus>,
        tool: Arc<MockResearchTool>,
        workspace: Workspace,
    }

    impl Harness {
        fn new(workspace: Workspace) -> Self {
            Self {
                bus: Arc::new(EventBus::new()),
                tool: Arc::new(MockResearchTool::new()),
                workspace,
            }
        }

        fn runner(&self, max_concurrent_domains: usize) -> TaskGraphRunner {
            let executor = ToolExecutor::new(
                Arc::clone(&self.tool) as _,
                RetryPolicy::default(),
                Duration::from_secs(30),
            );
            TaskGraphRunner::new(
                Arc::clone(&self.bus),
                Arc::new(StaticWorkspaceSource::new([self.workspace.clone()])),
                Arc::new(executor),
                RunnerConfig {
                    max_concurrent_domains,
                },
            )
        }

        async fn run(
            &self,
            max_concurrent_domains: usize,
        ) -> (Result<RunSummary, EngineError>, Vec<OrchestrationEvent>) {
            let session = SessionId::for_workspace(&self.workspace.id);
            self.bus.create_session(&session);
            let result = self
                .runner(max_concurrent_domains)
                .run(&self.workspace.id, &CancellationToken::new(), &PhaseTracker::new())
                .await;
            self.bus.close_session(&session);
            let events = self.bus.subscribe(&session).collect().await;
            (result, events)
        }
    }

    fn two_domain_workspace() -> Workspace {
        Workspace::new(
            WorkspaceId::new(),
            "grid scale storage",
            vec![
                Domain::new("dom_chem", "Chemistry")
                    .with_query("sodium ion cathodes", "cheaper than lithium")
                    .with_query("iron air cycle life", "long duration"),
                Domain::new("dom_policy", "Policy").with_query("capacity markets", "revenue"),
            ],
        )
    }

    fn types(events: &[OrchestrationEvent]) -> Vec<EventType> {
        events.iter().map(|e| e.event_type).collect()
    }

    use EventType::{Done, Error as ErrorEvent, Status, Thought, ToolCall, ToolResult};

    fn expected_success_sequence() -> Vec<EventType> {
        vec![
            Status, //
            Thought, Thought, ToolCall, ToolResult, Thought, ToolCall, ToolResult, //
            Thought, Thought, ToolCall, ToolResult, //
            Status, Thought, Done,
        ]
    }

    #[tokio::test(start_paused = true)]
    async fn completed_run_emits_full_sequence() {
        let h = Harness::new(two_domain_workspace());
        let (result, events) = h.run(1).await;

        let summary = result.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                domains: 2,
                queries: 3,
                succeeded: 3,
                failed: 0
            }
        );
        assert_eq!(types(&events), expected_success_sequence());
        assert_eq!(events[0].payload["domain_count"], 2);
        assert_eq!(events[1].payload["domain_id"], "dom_chem");
        assert!(events[1].message().unwrap().contains("Chemistry"));
        assert_eq!(events[2].payload["rationale"], "cheaper than lithium");
        assert_eq!(events[3].payload["query"], "sodium ion cathodes");
        assert_eq!(h.tool.call_log(), ["sodium ion cathodes", "iron air cycle life", "capacity markets"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_query_reports_error_and_run_continues() {
        let h = Harness::new(two_domain_workspace());
        h.tool.script("sodium ion cathodes", vec![MockOutcome::fail("scrape blocked"); 3]);
        let (result, events) = h.run(1).await;

        let summary = result.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(
            types(&events),
            [
                Status, Thought, Thought, ToolCall, ErrorEvent, Thought, ToolCall, ToolResult, Thought,
                Thought, ToolCall, ToolResult, Status, Thought, Done
            ]
        );
        let error = &events[4];
        assert_eq!(error.payload["query"], "sodium ion cathodes");
        assert_eq!(error.payload["domain_id"], "dom_chem");
        assert_eq!(error.payload["kind"], "tool_failure");
        assert_eq!(h.tool.calls("sodium ion cathodes"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_workspace_publishes_nothing() {
        let h = Harness::new(two_domain_workspace());
        let missing = WorkspaceId::from_raw("nonexistent-id");
        let session = SessionId::for_workspace(&missing);
        h.bus.create_session(&session);
        let phase = PhaseTracker::new();

        let err = h
            .runner(1)
            .run(&missing, &CancellationToken::new(), &phase)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WorkspaceNotFound(_)));
        assert_eq!(phase.get(), RunPhase::Error);

        h.bus.close_session(&session);
        let events: Vec<_> = h.bus.subscribe(&session).collect().await;
        assert_eq!(types(&events), [Done]);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_domains_match_sequential_order() {
        let workspace = Workspace::new(
            WorkspaceId::new(),
            "q",
            vec![
                Domain::new("slow", "Slow")
                    .with_query("slow-1", "r1")
                    .with_query("slow-2", "r2"),
                Domain::new("fast", "Fast").with_query("fast-1", "r3"),
                Domain::new("mid", "Mid")
                    .with_query("mid-1", "r4")
                    .with_query("mid-2", "r5"),
            ],
        );
        let sequential = Harness::new(workspace.clone());
        let (_, seq_events) = sequential.run(1).await;

        let concurrent = Harness::new(workspace);
        concurrent.tool.script(
            "slow-1",
            vec![MockOutcome::delayed(Duration::from_secs(5), MockOutcome::Succeed)],
        );
        concurrent.tool.script("mid-1", vec![MockOutcome::fail("flaky")]);
        let (result, con_events) = concurrent.run(3).await;

        assert_eq!(result.unwrap().succeeded, 5);
        assert_eq!(types(&con_events), types(&seq_events));
        let messages = |events: &[OrchestrationEvent]| -> Vec<Option<String>> {
            events.iter().map(|e| e.message().map(str::to_string)).collect()
        };
        assert_eq!(messages(&con_events), messages(&seq_events));

        // The fast domain really did run ahead of the slow one.
        let log = concurrent.tool.call_log();
        let fast = log.iter().position(|q| q == "fast-1").unwrap();
        let slow_2 = log.iter().position(|q| q == "slow-2").unwrap();
        assert!(fast < slow_2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_limit_of_one_domain_workspace_is_sequential() {
        let workspace = Workspace::new(
            WorkspaceId::new(),
            "q",
            vec![Domain::new("only", "Only").with_query("a", "r")],
        );
        let h = Harness::new(workspace);
        let (result, events) = h.run(8).await;
        assert!(result.is_ok());
        assert_eq!(
            types(&events),
            [Status, Thought, Thought, ToolCall, ToolResult, Status, Thought, Done]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_at_next_suspension_point() {
        let h = Harness::new(two_domain_workspace());
        h.tool.set_fallback(MockOutcome::delayed(Duration::from_secs(10), MockOutcome::Succeed));
        let session = SessionId::for_workspace(&h.workspace.id);
        h.bus.create_session(&session);
        let cancel = CancellationToken::new();
        let phase = PhaseTracker::new();

        let runner = h.runner(1);
        let run = runner.run(&h.workspace.id, &cancel, &phase);
        let trigger = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, trigger);

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(phase.get(), RunPhase::Error);
        assert_eq!(h.tool.call_log(), ["sodium ion cathodes"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_concurrent_domains_stops_workers_and_forwarder() {
        let workspace = Workspace::new(
            WorkspaceId::new(),
            "q",
            vec![
                Domain::new("a", "A").with_query("a-1", "r").with_query("a-2", "r"),
                Domain::new("b", "B").with_query("b-1", "r").with_query("b-2", "r"),
                Domain::new("c", "C").with_query("c-1", "r"),
            ],
        );
        let h = Harness::new(workspace);
        h.tool.set_fallback(MockOutcome::delayed(Duration::from_secs(10), MockOutcome::Succeed));
        let session = SessionId::for_workspace(&h.workspace.id);
        h.bus.create_session(&session);
        let cancel = CancellationToken::new();
        let phase = PhaseTracker::new();

        let runner = h.runner(2);
        let run = tokio::time::timeout(
            Duration::from_secs(60),
            runner.run(&h.workspace.id, &cancel, &phase),
        );
        let trigger = async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(run, trigger);

        let result = result.expect("concurrent run did not terminate after cancel");
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert_eq!(phase.get(), RunPhase::Error);

        // Only the first query of each admitted domain was in flight.
        let mut started = h.tool.call_log();
        started.sort();
        assert_eq!(started, ["a-1", "b-1"]);

        h.bus.close_session(&session);
        let events: Vec<_> = h.bus.subscribe(&session).collect().await;
        assert!(!types(&events).contains(&ToolResult));
        assert_eq!(types(&events).last(), Some(&Done));
    }

    #[tokio::test]
    async fn source_failure_is_store_error() {
        let bus = Arc::new(EventBus::new());
        let executor = ToolExecutor::new(
            Arc::new(MockResearchTool::new()),
            RetryPolicy::default(),
            Duration::from_secs(1),
        );
        let runner = TaskGraphRunner::new(
            bus,
            Arc::new(StaticWorkspaceSource::failing("database is locked")),
            Arc::new(executor),
            RunnerConfig::default(),
        );
        let err = runner
            .run(&WorkspaceId::new(), &CancellationToken::new(), &PhaseTracker::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[test]
    fn phase_display_and_serde() {
        assert_eq!(RunPhase::Query { domain: 1, query: 2 }.to_string(), "query:1:2");
        assert_eq!(
            serde_json::to_value(RunPhase::SynthesisReady).unwrap(),
            "synthesis_ready"
        );
        assert!(RunPhase::Done.is_terminal());
        assert!(!RunPhase::Loading.is_terminal());
    }

    #[test]
    fn phase_tracker_keeps_error() {
        let phase = PhaseTracker::new();
        assert_eq!(phase.get(), RunPhase::Init);
        phase.set(RunPhase::Error);
        phase.set(RunPhase::Done);
        assert_eq!(phase.get(), RunPhase::Error);
    }

    #[test]
    fn config_from_settings_clamps_zero() {
        let config = RunnerConfig::from_settings(&OrchestrationSettings {
            max_concurrent_domains: 0,
            tool_timeout_ms: 1000,
        });
        assert_eq!(config.max_concurrent_domains, 1);
    }
}
