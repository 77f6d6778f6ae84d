use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use scout_core::ids::{DomainId, WorkspaceId};
use scout_core::workspace::{Domain, ResearchQuery, Workspace};

use crate::database::Database;
use crate::error::StoreError;

/// Listing row for a stored workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub id: WorkspaceId,
    pub query: String,
    pub created_at: String,
    pub domain_count: usize,
}

/// Persists decomposed workspaces: one `workspaces` row plus ordered
/// `domains` rows whose queries are stored as a JSON array.
#[derive(Clone)]
pub struct WorkspaceRepo {
    db: Database,
}

impl WorkspaceRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a new workspace under a freshly minted id.
    #[instrument(skip(self, domains), fields(domain_count = domains.len()))]
    pub fn create(&self, query: &str, domains: Vec<Domain>) -> Result<Workspace, StoreError> {
        let workspace = Workspace::new(WorkspaceId::new(), query, domains);
        self.save(&workspace)?;
        Ok(workspace)
    }

    /// Insert or replace a workspace and its whole domain list.
    #[instrument(skip(self, workspace), fields(workspace_id = %workspace.id))]
    pub fn save(&self, workspace: &Workspace) -> Result<(), StoreError> {
        let mut seen = HashSet::new();
        for domain in &workspace.domains {
            if !seen.insert(domain.id.as_str()) {
                return Err(StoreError::Conflict(format!(
                    "duplicate domain id {} in workspace {}",
                    domain.id, workspace.id
                )));
            }
        }

        let created_at = if workspace.created_at.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            workspace.created_at.clone()
        };

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO workspaces (id, query, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET query = excluded.query",
                rusqlite::params![workspace.id.as_str(), workspace.query, created_at],
            )?;
            tx.execute(
                "DELETE FROM domains WHERE workspace_id = ?1",
                [workspace.id.as_str()],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO domains (workspace_id, id, position, name, description, search_queries)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (position, domain) in workspace.domains.iter().enumerate() {
                    let queries = serde_json::to_string(&domain.queries)?;
                    stmt.execute(rusqlite::params![
                        workspace.id.as_str(),
                        domain.id.as_str(),
                        position as i64,
                        domain.name,
                        domain.description,
                        queries,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Get a workspace by ID.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub fn get(&self, id: &WorkspaceId) -> Result<Workspace, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("workspace {id}")))
    }

    /// Get a workspace by ID, `None` when absent.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub fn find(&self, id: &WorkspaceId) -> Result<Option<Workspace>, StoreError> {
        self.db.with_conn(|conn| {
            let header = conn
                .query_row(
                    "SELECT id, query, created_at FROM workspaces WHERE id = ?1",
                    [id.as_str()],
                    |row| {
                        Ok((
                            WorkspaceId::from_raw(row.get::<_, String>(0)?),
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, query, created_at)) = header else {
                return Ok(None);
            };

            let domains = load_domains(conn, &id)?;
            Ok(Some(Workspace {
                id,
                query,
                created_at,
                domains,
            }))
        })
    }

    /// List all workspaces, newest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<WorkspaceSummary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT w.id, w.query, w.created_at,
                        (SELECT COUNT(*) FROM domains d WHERE d.workspace_id = w.id)
                 FROM workspaces w
                 ORDER BY w.created_at DESC, w.id DESC",
            )?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(WorkspaceSummary {
                        id: WorkspaceId::from_raw(row.get::<_, String>(0)?),
                        query: row.get(1)?,
                        created_at: row.get(2)?,
                        domain_count: row.get::<_, i64>(3)? as usize,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete a workspace and its domains. Returns whether a row existed.
    #[instrument(skip(self), fields(workspace_id = %id))]
    pub fn delete(&self, id: &WorkspaceId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM workspaces WHERE id = ?1", [id.as_str()])?;
            Ok(changed > 0)
        })
    }
}

fn load_domains(conn: &Connection, workspace_id: &WorkspaceId) -> Result<Vec<Domain>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, search_queries FROM domains
         WHERE workspace_id = ?1 ORDER BY position",
    )?;
    let raw = stmt
        .query_map([workspace_id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raw.into_iter()
        .map(|(id, name, description, queries)| {
            let queries: Vec<ResearchQuery> = serde_json::from_str(&queries)?;
            Ok(Domain {
                id: DomainId::from_raw(id),
                name,
                description,
                queries,
            })
        })
        .collect()
}
