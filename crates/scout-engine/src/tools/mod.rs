pub mod brave;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use scout_core::research::ResearchTool;
use scout_settings::{SearchProvider, SearchSettings};
use scout_store::DocumentRepo;

pub use brave::BraveSearchTool;
pub use simulated::SimulatedResearchTool;

/// Create the research tool selected by the search settings.
pub fn create_research_tool(
    settings: &SearchSettings,
    documents: DocumentRepo,
) -> Arc<dyn ResearchTool> {
    match settings.provider {
        SearchProvider::Simulated => Arc::new(SimulatedResearchTool::new(
            documents,
            Duration::from_millis(settings.simulated_latency_ms),
        )),
        SearchProvider::Brave => Arc::new(BraveSearchTool::new(settings, documents)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_store::Database;

    #[test]
    fn provider_selects_tool() {
        let repo = DocumentRepo::new(Database::in_memory().unwrap());
        let simulated = create_research_tool(&SearchSettings::default(), repo.clone());
        assert_eq!(simulated.name(), "simulated_search");

        let brave = create_research_tool(
            &SearchSettings {
                provider: SearchProvider::Brave,
                ..SearchSettings::default()
            },
            repo,
        );
        assert_eq!(brave.name(), "brave_search");
    }
}
