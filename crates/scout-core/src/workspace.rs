use serde::{Deserialize, Serialize};

use crate::ids::{DomainId, WorkspaceId};

/// A single unit of external research work.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub query: String,
    pub rationale: String,
}

impl ResearchQuery {
    pub fn new(query: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            rationale: rationale.into(),
        }
    }
}

/// A named subdivision of a research task with its ordered queries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub id: DomainId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "search_queries", alias = "queries", default)]
    pub queries: Vec<ResearchQuery>,
}

impl Domain {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: DomainId::from_raw(id),
            name: name.into(),
            description: String::new(),
            queries: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>, rationale: impl Into<String>) -> Self {
        self.queries.push(ResearchQuery::new(query, rationale));
        self
    }
}

/// A decomposed research task. Domains keep insertion order, which fixes
/// the order events are produced in for a given workspace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub domains: Vec<Domain>,
}

impl Workspace {
    pub fn new(id: WorkspaceId, query: impl Into<String>, domains: Vec<Domain>) -> Self {
        Self {
            id,
            query: query.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            domains,
        }
    }

    pub fn total_queries(&self) -> usize {
        self.domains.iter().map(|d| d.queries.len()).sum()
    }
}
