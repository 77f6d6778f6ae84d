use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument};

use scout_core::errors::ToolError;
use scout_core::research::{DocumentRef, ResearchRequest, ResearchTool};
use scout_settings::SearchSettings;
use scout_store::{DocumentRepo, NewDocument};

pub const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
pub const API_KEY_ENV: &str = "BRAVE_SEARCH_API_KEY";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Research tool backed by the Brave web search API. The top results are
/// ingested as documents; the first one is returned.
pub struct BraveSearchTool {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
    max_results: usize,
    documents: DocumentRepo,
}

impl fmt::Debug for BraveSearchTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BraveSearchTool")
            .field("endpoint", &self.endpoint)
            .field("max_results", &self.max_results)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl BraveSearchTool {
    /// Build from settings, reading the API key from the environment.
    pub fn new(settings: &SearchSettings, documents: DocumentRepo) -> Self {
        let api_key = std::env::var(API_KEY_ENV).ok().map(SecretString::from);
        Self::with_api_key(settings, documents, api_key)
    }

    pub fn with_api_key(
        settings: &SearchSettings,
        documents: DocumentRepo,
        api_key: Option<SecretString>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .user_agent("Scout/0.1")
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            endpoint: BRAVE_SEARCH_URL.to_string(),
            max_results: settings.max_results.clamp(1, 20),
            documents,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn search(&self, query: &str) -> Result<Vec<WebResult>, ToolError> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            ToolError::Failed(format!("{API_KEY_ENV} not set. Web search requires an API key."))
        })?;

        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", api_key.expose_secret())
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("Search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Failed(format!("Search failed: HTTP {status}: {body}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("Failed to parse response: {e}")))?;

        let mut results = body.web.map(|w| w.results).unwrap_or_default();
        results.retain(|r| !r.title.is_empty() || !r.description.is_empty());
        results.truncate(self.max_results);
        Ok(results)
    }
}

#[async_trait]
impl ResearchTool for BraveSearchTool {
    fn name(&self) -> &str {
        "brave_search"
    }

    #[instrument(skip(self, request), fields(domain_id = %request.domain_id))]
    async fn perform(&self, request: &ResearchRequest) -> Result<DocumentRef, ToolError> {
        let results = self.search(&request.query).await?;
        if results.is_empty() {
            return Err(ToolError::Failed(format!(
                "No search results for \"{}\"",
                request.query
            )));
        }
        debug!(count = results.len(), "ingesting search results");

        let workspace_id = request.session_id.workspace_id();
        let docs: Vec<NewDocument> = results
            .into_iter()
            .map(|r| NewDocument {
                workspace_id: workspace_id.clone(),
                domain_id: request.domain_id.clone(),
                title: if r.title.is_empty() { r.url.clone() } else { r.title },
                content: r.description,
                source_url: (!r.url.is_empty()).then_some(r.url),
            })
            .collect();

        let documents = self.documents.clone();
        let stored = tokio::task::spawn_blocking(move || {
            docs.iter()
                .map(|doc| documents.insert(doc))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| ToolError::Store(format!("ingest task failed: {e}")))?
        .map_err(|e| ToolError::Store(e.to_string()))?;

        stored
            .first()
            .map(|doc| doc.to_ref())
            .ok_or_else(|| ToolError::Store("no documents ingested".into()))
    }
}
