//! Scripted collaborators for deterministic tests without a database or network.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use scout_core::errors::{SourceError, ToolError};
use scout_core::ids::{DocumentId, WorkspaceId};
use scout_core::research::{DocumentRef, ResearchRequest, ResearchTool, WorkspaceSource};
use scout_core::workspace::Workspace;

/// One scripted attempt of [`MockResearchTool`].
#[derive(Clone, Debug)]
pub enum MockOutcome {
    Succeed,
    Fail(ToolError),
    Panic(String),
    /// Wait, then resolve the inner outcome.
    Delay(Duration, Box<MockOutcome>),
}

impl MockOutcome {
    pub fn fail(message: &str) -> Self {
        Self::Fail(ToolError::Failed(message.to_string()))
    }

    pub fn delayed(delay: Duration, inner: MockOutcome) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Research tool that plays back per-query scripts. Queries without a
/// script (or whose script ran out) use the fallback outcome, which
/// succeeds unless changed.
pub struct MockResearchTool {
    scripts: Mutex<HashMap<String, VecDeque<MockOutcome>>>,
    fallback: Mutex<MockOutcome>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockResearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockResearchTool {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(MockOutcome::Succeed),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue outcomes for successive attempts at `query`.
    pub fn script(&self, query: &str, outcomes: Vec<MockOutcome>) {
        self.scripts
            .lock()
            .entry(query.to_string())
            .or_default()
            .extend(outcomes);
    }

    pub fn set_fallback(&self, outcome: MockOutcome) {
        *self.fallback.lock() = outcome;
    }

    /// Attempts made for `query`.
    pub fn calls(&self, query: &str) -> usize {
        self.calls.lock().iter().filter(|q| *q == query).count()
    }

    /// Every attempted query, in call order.
    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn next_outcome(&self, query: &str) -> MockOutcome {
        self.calls.lock().push(query.to_string());
        self.scripts
            .lock()
            .get_mut(query)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl ResearchTool for MockResearchTool {
    fn name(&self) -> &str {
        "mock_search"
    }

    async fn perform(&self, request: &ResearchRequest) -> Result<DocumentRef, ToolError> {
        let mut outcome = self.next_outcome(&request.query);
        loop {
            match outcome {
                MockOutcome::Succeed => {
                    return Ok(DocumentRef {
                        id: DocumentId::new(),
                        workspace_id: request.session_id.workspace_id(),
                        domain_id: request.domain_id.clone(),
                        title: format!("Research: {}", request.query),
                    });
                }
                MockOutcome::Fail(e) => return Err(e),
                MockOutcome::Panic(message) => panic!("{message}"),
                MockOutcome::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
            }
        }
    }
}

/// Workspace source over a fixed in-memory set.
#[derive(Default)]
pub struct StaticWorkspaceSource {
    workspaces: HashMap<WorkspaceId, Workspace>,
    failure: Option<String>,
}

impl StaticWorkspaceSource {
    pub fn new(workspaces: impl IntoIterator<Item = Workspace>) -> Self {
        Self {
            workspaces: workspaces.into_iter().map(|w| (w.id.clone(), w)).collect(),
            failure: None,
        }
    }

    /// A source whose every lookup fails.
    pub fn failing(message: &str) -> Self {
        Self {
            workspaces: HashMap::new(),
            failure: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl WorkspaceSource for StaticWorkspaceSource {
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, SourceError> {
        if let Some(message) = &self.failure {
            return Err(SourceError(message.clone()));
        }
        Ok(self.workspaces.get(id).cloned())
    }
}
