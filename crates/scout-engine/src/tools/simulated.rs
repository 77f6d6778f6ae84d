use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument};

use scout_core::errors::ToolError;
use scout_core::research::{DocumentRef, ResearchRequest, ResearchTool};
use scout_store::{DocumentRepo, NewDocument};

pub const SIMULATED_SOURCE_URL: &str = "https://simulated-source.com";

/// Offline research tool: waits out a fixed latency, then synthesizes a
/// document for the query and ingests it.
pub struct SimulatedResearchTool {
    documents: DocumentRepo,
    latency: Duration,
}

impl SimulatedResearchTool {
    pub fn new(documents: DocumentRepo, latency: Duration) -> Self {
        Self { documents, latency }
    }
}

#[async_trait]
impl ResearchTool for SimulatedResearchTool {
    fn name(&self) -> &str {
        "simulated_search"
    }

    #[instrument(skip(self, request), fields(domain_id = %request.domain_id))]
    async fn perform(&self, request: &ResearchRequest) -> Result<DocumentRef, ToolError> {
        tokio::time::sleep(self.latency).await;

        let doc = NewDocument {
            workspace_id: request.session_id.workspace_id(),
            domain_id: request.domain_id.clone(),
            title: format!("Research: {}", request.query),
            content: format!(
                "Simulated knowledge regarding {}. Collected for offline runs; \
                 no external source was contacted.",
                request.query
            ),
            source_url: Some(SIMULATED_SOURCE_URL.to_string()),
        };

        let documents = self.documents.clone();
        let stored = tokio::task::spawn_blocking(move || documents.insert(&doc))
            .await
            .map_err(|e| ToolError::Store(format!("ingest task failed: {e}")))?
            .map_err(|e| ToolError::Store(e.to_string()))?;

        debug!(document_id = %stored.id, "simulated document ingested");
        Ok(stored.to_ref())
    }
}
