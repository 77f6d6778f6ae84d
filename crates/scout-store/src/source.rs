use async_trait::async_trait;

use scout_core::errors::SourceError;
use scout_core::ids::WorkspaceId;
use scout_core::research::WorkspaceSource;
use scout_core::workspace::Workspace;

use crate::workspaces::WorkspaceRepo;

/// [`WorkspaceSource`] backed by the SQLite workspace table.
#[derive(Clone)]
pub struct StoreWorkspaceSource {
    repo: WorkspaceRepo,
}

impl StoreWorkspaceSource {
    pub fn new(repo: WorkspaceRepo) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl WorkspaceSource for StoreWorkspaceSource {
    async fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>, SourceError> {
        let repo = self.repo.clone();
        let id = id.clone();
        tokio::task::spawn_blocking(move || repo.find(&id))
            .await
            .map_err(|e| SourceError(format!("lookup task failed: {e}")))?
            .map_err(|e| SourceError(e.to_string()))
    }
}
