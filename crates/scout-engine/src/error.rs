use scout_core::errors::{SourceError, ToolError};
use scout_core::ids::WorkspaceId;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Workspace not found")]
    WorkspaceNotFound(WorkspaceId),

    #[error("tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("run cancelled")]
    Cancelled,

    #[error("orchestration already running for {0}")]
    AlreadyRunning(WorkspaceId),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification used in logs and `error` event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkspaceNotFound(_) => "not_found",
            Self::Tool(_) => "tool_failure",
            Self::Cancelled => "cancelled",
            Self::AlreadyRunning(_) => "already_running",
            Self::Store(_) => "store",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<SourceError> for EngineError {
    fn from(e: SourceError) -> Self {
        Self::Store(e.0)
    }
}

impl From<scout_store::StoreError> for EngineError {
    fn from(e: scout_store::StoreError) -> Self {
        Self::Store(e.to_string())
    }
}
