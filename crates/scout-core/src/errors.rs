use std::time::Duration;

/// Failure of a single research tool attempt.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("execution failed: {0}")]
    Failed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("document store error: {0}")]
    Store(String),
    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Everything except cancellation counts against the retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Failed(_) => "failed",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Failure reading from the workspace store.
#[derive(Clone, Debug, thiserror::Error)]
#[error("workspace source error: {0}")]
pub struct SourceError(pub String);
