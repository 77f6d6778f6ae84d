//! Persisted warnings from research runs.
//!
//! Only WARN and ERROR records are kept. Each row is keyed by the session
//! and domain it was raised in, taken from the event's own fields or from
//! the enclosing `run`/`domain` spans. The executor's retry fields
//! (`attempt`, `error_kind`) land in their own columns so a session's
//! retry pressure can be summarized per domain.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{span, Level};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

const DEFAULT_LIMIT: u32 = 100;
const MAX_LIMIT: u32 = 1000;

const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
CREATE TABLE IF NOT EXISTS run_warnings (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT NOT NULL,
    level       TEXT NOT NULL,
    target      TEXT NOT NULL,
    message     TEXT NOT NULL,
    session_id  TEXT,
    domain_id   TEXT,
    attempt     INTEGER,
    error_kind  TEXT,
    details     TEXT
);
CREATE INDEX IF NOT EXISTS idx_run_warnings_session_domain
    ON run_warnings(session_id, domain_id);
CREATE INDEX IF NOT EXISTS idx_run_warnings_domain ON run_warnings(domain_id);
CREATE INDEX IF NOT EXISTS idx_run_warnings_kind ON run_warnings(error_kind);
";

/// A persisted WARN or ERROR record.
#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub session_id: Option<String>,
    pub domain_id: Option<String>,
    pub attempt: Option<u32>,
    pub error_kind: Option<String>,
    /// Remaining structured fields of the event.
    pub details: Option<Value>,
}

/// Filters for [`SqliteLogSink::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub session_id: Option<String>,
    pub domain_id: Option<String>,
    pub error_kind: Option<String>,
    /// `WARN` or `ERROR`.
    pub level: Option<String>,
    /// RFC 3339 lower bound, inclusive.
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// Warning totals for one domain of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DomainWarnings {
    pub domain_id: String,
    pub warnings: u32,
    /// Highest tool attempt number seen, if any retry was logged.
    pub max_attempt: Option<u32>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            // Connection::open reports the failure if this did not work.
            let _ = std::fs::create_dir_all(parent);
        }
        Self::with_connection(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, w: &NewWarning) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO run_warnings
                 (timestamp, level, target, message, session_id, domain_id, attempt, error_kind, details)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        stmt.execute(params![
            w.timestamp,
            w.level,
            w.target,
            w.message,
            w.session_id,
            w.domain_id,
            w.attempt,
            w.error_kind,
            w.details,
        ])?;
        Ok(())
    }

    /// Newest first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, timestamp, level, target, message, session_id, domain_id,
                    attempt, error_kind, details
             FROM run_warnings
             WHERE (?1 IS NULL OR session_id = ?1)
               AND (?2 IS NULL OR domain_id = ?2)
               AND (?3 IS NULL OR error_kind = ?3)
               AND (?4 IS NULL OR level = ?4)
               AND (?5 IS NULL OR timestamp >= ?5)
             ORDER BY id DESC
             LIMIT ?6",
        )?;
        let rows = stmt.query_map(
            params![
                q.session_id,
                q.domain_id,
                q.error_kind,
                q.level.as_deref().map(str::to_ascii_uppercase),
                q.since,
                limit,
            ],
            |row| {
                let details: Option<String> = row.get(9)?;
                Ok(LogRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    level: row.get(2)?,
                    target: row.get(3)?,
                    message: row.get(4)?,
                    session_id: row.get(5)?,
                    domain_id: row.get(6)?,
                    attempt: row.get(7)?,
                    error_kind: row.get(8)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                })
            },
        )?;
        rows.collect()
    }

    /// Per-domain warning counts for one session, in domain id order.
    pub fn domain_summary(&self, session_id: &str) -> Result<Vec<DomainWarnings>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT domain_id, COUNT(*), MAX(attempt)
             FROM run_warnings
             WHERE session_id = ?1 AND domain_id IS NOT NULL
             GROUP BY domain_id
             ORDER BY domain_id",
        )?;
        let rows = stmt.query_map([session_id], |row| {
            Ok(DomainWarnings {
                domain_id: row.get(0)?,
                warnings: row.get(1)?,
                max_attempt: row.get(2)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM run_warnings", [], |row| row.get(0))
    }
}

struct NewWarning {
    timestamp: String,
    level: &'static str,
    target: String,
    message: String,
    session_id: Option<String>,
    domain_id: Option<String>,
    attempt: Option<u32>,
    error_kind: Option<String>,
    details: Option<String>,
}

/// Session and domain a span belongs to, inherited from its parent when
/// the span itself does not name them.
#[derive(Clone, Default)]
struct RunScope {
    session_id: Option<String>,
    domain_id: Option<String>,
}

impl RunScope {
    fn fill_from(&mut self, outer: &RunScope) {
        if self.session_id.is_none() {
            self.session_id.clone_from(&outer.session_id);
        }
        if self.domain_id.is_none() {
            self.domain_id.clone_from(&outer.domain_id);
        }
    }
}

#[derive(Default)]
struct WarningFields {
    message: String,
    scope: RunScope,
    attempt: Option<u32>,
    error_kind: Option<String>,
    details: Map<String, Value>,
}

impl WarningFields {
    fn put(&mut self, name: &str, value: Value) {
        match (name, value) {
            ("message", Value::String(s)) => self.message = s,
            ("session_id", Value::String(s)) => self.scope.session_id = Some(s),
            ("domain_id", Value::String(s)) => self.scope.domain_id = Some(s),
            ("error_kind", Value::String(s)) => self.error_kind = Some(s),
            ("attempt", Value::Number(n)) => {
                self.attempt = n.as_u64().and_then(|a| u32::try_from(a).ok());
            }
            (name, value) => {
                self.details.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for WarningFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{value:?}");
        let text = match field.name() {
            "message" => text,
            _ => text.trim_matches('"').to_string(),
        };
        self.put(field.name(), Value::String(text));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), Value::String(value.to_string()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), Value::Bool(value));
    }
}

/// Writes WARN+ events to a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = WarningFields::default();
        attrs.record(&mut fields);
        let mut scope = fields.scope;
        if let Some(parent) = span.parent() {
            if let Some(outer) = parent.extensions().get::<RunScope>() {
                scope.fill_from(outer);
            }
        }
        span.extensions_mut().insert(scope);
    }

    fn on_record(&self, id: &span::Id, values: &span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = WarningFields::default();
        values.record(&mut fields);
        let mut extensions = span.extensions_mut();
        if let Some(scope) = extensions.get_mut::<RunScope>() {
            let mut updated = fields.scope;
            updated.fill_from(scope);
            *scope = updated;
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > Level::WARN {
            return;
        }

        let mut fields = WarningFields::default();
        event.record(&mut fields);
        if let Some(span) = ctx.event_span(event) {
            if let Some(outer) = span.extensions().get::<RunScope>() {
                fields.scope.fill_from(outer);
            }
        }

        let warning = NewWarning {
            timestamp: Utc::now().to_rfc3339(),
            level: level.as_str(),
            target: event.metadata().target().to_string(),
            message: fields.message,
            session_id: fields.scope.session_id,
            domain_id: fields.scope.domain_id,
            attempt: fields.attempt,
            error_kind: fields.error_kind,
            details: (!fields.details.is_empty())
                .then(|| Value::Object(fields.details).to_string()),
        };
        if let Err(e) = self.sink.insert(&warning) {
            // Logging through tracing here would re-enter this layer.
            eprintln!("scout-telemetry: failed to persist warning: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn sink() -> Arc<SqliteLogSink> {
        Arc::new(SqliteLogSink::in_memory().unwrap())
    }

    fn with_layer(sink: &Arc<SqliteLogSink>, f: impl FnOnce()) {
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(Arc::clone(sink)));
        tracing::subscriber::with_default(subscriber, f);
    }

    fn warning(session: &str, domain: Option<&str>, attempt: Option<u32>, kind: &str) -> NewWarning {
        NewWarning {
            timestamp: "2026-03-01T12:00:00+00:00".into(),
            level: "WARN",
            target: "scout_engine::executor".into(),
            message: "retrying research tool after error".into(),
            session_id: Some(session.into()),
            domain_id: domain.map(str::to_string),
            attempt,
            error_kind: Some(kind.into()),
            details: None,
        }
    }

    #[test]
    fn file_sink_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SqliteLogSink::new(&dir.path().join("nested/deeper/logs.db")).unwrap();
        sink.insert(&warning("sess_1", Some("dom_a"), Some(1), "failed"))
            .unwrap();
        assert_eq!(sink.count().unwrap(), 1);
    }

    #[test]
    fn executor_retry_fields_become_columns() {
        let sink = sink();
        with_layer(&sink, || {
            let run = tracing::info_span!("run", session_id = "ws_1");
            let _run = run.enter();
            let domain = tracing::info_span!("domain", domain_id = "dom_chem", index = 0_u64);
            let _domain = domain.enter();
            tracing::warn!(
                attempt = 2_u32,
                delay_ms = 4000_u64,
                error_kind = "timeout",
                error = "tool call timed out",
                "retrying research tool after error"
            );
        });

        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.session_id.as_deref(), Some("ws_1"));
        assert_eq!(r.domain_id.as_deref(), Some("dom_chem"));
        assert_eq!(r.attempt, Some(2));
        assert_eq!(r.error_kind.as_deref(), Some("timeout"));
        assert_eq!(r.level, "WARN");
        let details = r.details.as_ref().unwrap();
        assert_eq!(details["delay_ms"], 4000);
        assert_eq!(details["error"], "tool call timed out");
        assert!(details.get("attempt").is_none());
    }

    #[test]
    fn info_and_debug_are_not_persisted() {
        let sink = sink();
        with_layer(&sink, || {
            tracing::info!("domain started");
            tracing::debug!("dispatching");
            tracing::error!("orchestration failed");
        });
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, "ERROR");
        assert_eq!(records[0].session_id, None);
    }

    #[test]
    fn event_fields_take_precedence_over_spans() {
        let sink = sink();
        with_layer(&sink, || {
            let run = tracing::info_span!("run", session_id = "ws_outer");
            let _run = run.enter();
            tracing::warn!(session_id = "ws_inner", domain_id = "dom_x", "explicit ids");
        });
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records[0].session_id.as_deref(), Some("ws_inner"));
        assert_eq!(records[0].domain_id.as_deref(), Some("dom_x"));
    }

    #[test]
    fn late_recorded_span_ids_are_picked_up() {
        let sink = sink();
        with_layer(&sink, || {
            let run = tracing::info_span!("run", session_id = tracing::field::Empty);
            run.record("session_id", "ws_late");
            let _run = run.enter();
            tracing::warn!("after record");
        });
        let records = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(records[0].session_id.as_deref(), Some("ws_late"));
    }

    #[test]
    fn query_filters_by_domain_and_kind() {
        let sink = sink();
        sink.insert(&warning("ws_1", Some("dom_a"), Some(1), "timeout")).unwrap();
        sink.insert(&warning("ws_1", Some("dom_b"), Some(1), "failed")).unwrap();
        sink.insert(&warning("ws_2", Some("dom_a"), Some(2), "timeout")).unwrap();

        let by_domain = sink
            .query(&LogQuery {
                session_id: Some("ws_1".into()),
                domain_id: Some("dom_a".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_domain.len(), 1);
        assert_eq!(by_domain[0].error_kind.as_deref(), Some("timeout"));

        let timeouts = sink
            .query(&LogQuery {
                error_kind: Some("timeout".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(timeouts.len(), 2);
        assert_eq!(timeouts[0].session_id.as_deref(), Some("ws_2"));
    }

    #[test]
    fn query_level_is_case_insensitive_and_limit_is_clamped() {
        let sink = sink();
        for _ in 0..5 {
            sink.insert(&warning("ws_1", None, None, "failed")).unwrap();
        }
        let warns = sink
            .query(&LogQuery {
                level: Some("warn".into()),
                limit: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(warns.len(), 1);
    }

    #[test]
    fn query_since_is_inclusive_lower_bound() {
        let sink = sink();
        let mut old = warning("ws_1", None, None, "timeout");
        old.timestamp = "2026-03-01T11:00:00+00:00".into();
        sink.insert(&old).unwrap();
        sink.insert(&warning("ws_1", None, None, "timeout")).unwrap();

        let recent = sink
            .query(&LogQuery {
                since: Some("2026-03-01T12:00:00+00:00".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn domain_summary_counts_retries_per_domain() {
        let sink = sink();
        sink.insert(&warning("ws_1", Some("dom_b"), Some(1), "timeout")).unwrap();
        sink.insert(&warning("ws_1", Some("dom_b"), Some(2), "timeout")).unwrap();
        sink.insert(&warning("ws_1", Some("dom_a"), None, "failed")).unwrap();
        sink.insert(&warning("ws_1", None, Some(3), "timeout")).unwrap();
        sink.insert(&warning("ws_2", Some("dom_a"), Some(3), "timeout")).unwrap();

        assert_eq!(
            sink.domain_summary("ws_1").unwrap(),
            [
                DomainWarnings {
                    domain_id: "dom_a".into(),
                    warnings: 1,
                    max_attempt: None,
                },
                DomainWarnings {
                    domain_id: "dom_b".into(),
                    warnings: 2,
                    max_attempt: Some(2),
                },
            ]
        );
    }
}
