//! Knowledge documents produced by research tools, with FTS5 search.

use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument, warn};

use scout_core::ids::{DocumentId, DomainId, WorkspaceId};
use scout_core::research::DocumentRef;

use crate::database::Database;
use crate::error::StoreError;

/// A stored knowledge document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub workspace_id: WorkspaceId,
    pub domain_id: DomainId,
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
    pub content_hash: String,
    pub created_at: String,
}

impl Document {
    pub fn to_ref(&self) -> DocumentRef {
        DocumentRef {
            id: self.id.clone(),
            workspace_id: self.workspace_id.clone(),
            domain_id: self.domain_id.clone(),
            title: self.title.clone(),
        }
    }
}

/// Input for [`DocumentRepo::insert`].
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub workspace_id: WorkspaceId,
    pub domain_id: DomainId,
    pub title: String,
    pub content: String,
    pub source_url: Option<String>,
}

/// A full-text match.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub document: Document,
    /// Highlighted excerpt of the matching content.
    pub snippet: String,
    /// bm25 score; lower is better.
    pub rank: f64,
}

const COLUMNS: &str =
    "d.id, d.workspace_id, d.domain_id, d.title, d.content, d.source_url, d.content_hash, d.created_at";

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\p{L}\p{N}_]+").unwrap());

#[derive(Clone)]
pub struct DocumentRepo {
    db: Database,
}

impl DocumentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a document. Re-ingesting the same content for the same
    /// workspace and domain returns the existing row.
    #[instrument(skip(self, doc), fields(workspace_id = %doc.workspace_id, domain_id = %doc.domain_id))]
    pub fn insert(&self, doc: &NewDocument) -> Result<Document, StoreError> {
        let content_hash = content_hash(&doc.content);
        let id = DocumentId::new();
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO documents
                     (id, workspace_id, domain_id, title, content, source_url, content_hash, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    id.as_str(),
                    doc.workspace_id.as_str(),
                    doc.domain_id.as_str(),
                    doc.title,
                    doc.content,
                    doc.source_url,
                    content_hash,
                    now,
                ],
            )?;

            if inserted == 0 {
                debug!(content_hash = %content_hash, "document already ingested");
            }

            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM documents d
                     WHERE d.workspace_id = ?1 AND d.domain_id = ?2 AND d.content_hash = ?3"
                ),
                rusqlite::params![doc.workspace_id.as_str(), doc.domain_id.as_str(), content_hash],
                row_to_document,
            )
            .map_err(StoreError::from)
        })
    }

    /// Get a document by ID.
    #[instrument(skip(self), fields(document_id = %id))]
    pub fn get(&self, id: &DocumentId) -> Result<Document, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM documents d WHERE d.id = ?1"),
                [id.as_str()],
                row_to_document,
            )
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("document {id}")))
        })
    }

    /// List documents for a workspace in ingestion order.
    #[instrument(skip(self), fields(workspace_id = %workspace_id))]
    pub fn list_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
        limit: u32,
    ) -> Result<Vec<Document>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM documents d
                 WHERE d.workspace_id = ?1
                 ORDER BY d.rowid
                 LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![workspace_id.as_str(), limit], row_to_document)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_for_workspace(&self, workspace_id: &WorkspaceId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE workspace_id = ?1",
                [workspace_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Full-text search over title and content.
    ///
    /// Free text is reduced to quoted word tokens, so any input is a valid
    /// FTS5 expression. Input with no word characters, or a query SQLite
    /// still rejects, yields no hits.
    #[instrument(skip(self))]
    pub fn search(
        &self,
        query: &str,
        workspace_id: Option<&WorkspaceId>,
        limit: u32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let Some(expr) = sanitize_fts_query(query) else {
            return Ok(Vec::new());
        };

        self.db.with_conn(|conn| {
            let mut sql = format!(
                "SELECT {COLUMNS},
                        snippet(documents_fts, 1, '[', ']', '...', 12),
                        bm25(documents_fts)
                 FROM documents_fts
                 JOIN documents d ON d.rowid = documents_fts.rowid
                 WHERE documents_fts MATCH ?1"
            );
            let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(expr.clone())];
            if let Some(ws) = workspace_id {
                sql.push_str(&format!(" AND d.workspace_id = ?{}", params.len() + 1));
                params.push(Box::new(ws.as_str().to_string()));
            }
            sql.push_str(&format!(" ORDER BY bm25(documents_fts) LIMIT {limit}"));

            let param_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();

            let result = conn.prepare(&sql).and_then(|mut stmt| {
                let hits = stmt
                    .query_map(param_refs.as_slice(), |row| {
                        Ok(SearchHit {
                            document: row_to_document(row)?,
                            snippet: row.get(8)?,
                            rank: row.get(9)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>();
                hits
            });

            match result {
                Ok(hits) => Ok(hits),
                Err(rusqlite::Error::SqliteFailure(_, msg)) => {
                    warn!(query = %expr, error = ?msg, "fts query rejected");
                    Ok(Vec::new())
                }
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Hex sha256 of the document body.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Turn free text into an FTS5 expression of quoted tokens (implicit AND).
pub fn sanitize_fts_query(raw: &str) -> Option<String> {
    let tokens: Vec<String> = TOKEN_RE
        .find_iter(raw)
        .map(|m| format!("\"{}\"", m.as_str()))
        .collect();
    (!tokens.is_empty()).then(|| tokens.join(" "))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: DocumentId::from_raw(row.get::<_, String>(0)?),
        workspace_id: WorkspaceId::from_raw(row.get::<_, String>(1)?),
        domain_id: DomainId::from_raw(row.get::<_, String>(2)?),
        title: row.get(3)?,
        content: row.get(4)?,
        source_url: row.get(5)?,
        content_hash: row.get(6)?,
        created_at: row.get(7)?,
    })
}
