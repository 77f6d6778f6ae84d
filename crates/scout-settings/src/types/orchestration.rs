use serde::{Deserialize, Serialize};

/// Task graph execution settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrchestrationSettings {
    /// Domains processed at once. `1` keeps the run fully sequential.
    pub max_concurrent_domains: usize,
    /// Ceiling for a single research tool attempt in milliseconds.
    pub tool_timeout_ms: u64,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            max_concurrent_domains: 1,
            tool_timeout_ms: 30_000,
        }
    }
}

/// Which research tool backs tool calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchProvider {
    /// Offline tool that synthesizes a document per query.
    #[default]
    Simulated,
    /// Brave web search. Needs `BRAVE_SEARCH_API_KEY`.
    Brave,
}

/// Research tool selection.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchSettings {
    pub provider: SearchProvider,
    /// Artificial latency of the simulated tool in milliseconds.
    pub simulated_latency_ms: u64,
    /// Search results ingested per query.
    pub max_results: usize,
    /// HTTP timeout for the web search request in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            provider: SearchProvider::Simulated,
            simulated_latency_ms: 1_500,
            max_results: 5,
            request_timeout_ms: 15_000,
        }
    }
}
