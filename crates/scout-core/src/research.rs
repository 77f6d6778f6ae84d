//! Collaborator seams consumed by the orchestration core.
//!
//! The core never looks inside these: a `WorkspaceSource` hands over an
//! immutable domain/query tree, and a `ResearchTool` either ingests
//! something for a query or fails.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{SourceError, ToolError};
use crate::ids::{DocumentId, DomainId, SessionId, WorkspaceId};
use crate::workspace::Workspace;

/// Input to one research action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResearchRequest {
    pub session_id: SessionId,
    pub domain_id: DomainId,
    pub query: String,
}

/// Handle to the document a successful research action produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub domain_id: DomainId,
    pub title: String,
}

/// Read-only access to decomposed workspaces.
#[async_trait]
pub trait WorkspaceSource: Send + Sync {
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, SourceError>;
}

/// An external search-and-ingest action. Implementations must be safe to
/// call again for the same request after a failure.
#[async_trait]
pub trait ResearchTool: Send + Sync {
    fn name(&self) -> &str;

    async fn perform(&self, request: &ResearchRequest) -> Result<DocumentRef, ToolError>;
}
