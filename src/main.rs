//! # scout
//!
//! Research orchestrator binary. Serves the HTTP/SSE API and offers one-shot
//! `ingest`, `run` and `search` commands over the same database.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Deserialize;

use scout_core::ids::{SessionId, WorkspaceId};
use scout_core::workspace::{Domain, Workspace};
use scout_engine::event_bus::EventBus;
use scout_server::{AppState, EngineOrchestrator, ResearchOrchestrator, ServerConfig};
use scout_settings::{load_settings, load_settings_from_path, ScoutSettings};
use scout_store::{Database, DocumentRepo, WorkspaceRepo};
use scout_telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

/// Scout research orchestrator.
#[derive(Parser, Debug)]
#[command(name = "scout", about = "Research orchestration with live event streaming", version)]
struct Cli {
    /// Settings file (defaults to `~/.scout/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Path to the `SQLite` database (overrides settings).
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server.
    Serve {
        /// Host to bind.
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Store a workspace decomposition read from a JSON file.
    Ingest { file: PathBuf },
    /// Run a stored workspace in-process, printing each event as a JSON line.
    Run { workspace_id: String },
    /// Full-text search over ingested documents.
    Search {
        query: String,

        #[arg(long, default_value_t = 10)]
        limit: u32,

        /// Restrict hits to one workspace.
        #[arg(long)]
        workspace: Option<String>,
    },
}

/// Workspace file accepted by `scout ingest`. Without an `id` a new
/// workspace is created; with one, that workspace is replaced.
#[derive(Debug, Deserialize)]
struct WorkspaceFile {
    #[serde(default)]
    id: Option<WorkspaceId>,
    query: String,
    #[serde(default)]
    domains: Vec<Domain>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("Failed to load settings")?;

    let telemetry = Arc::new(init_telemetry(TelemetryConfig::from_settings(&settings)));

    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| settings.storage.database_path());
    let db = Database::open(&db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    match cli.command {
        Command::Serve { host, port } => {
            let mut settings = settings;
            if let Some(host) = host {
                settings.server.host = host;
            }
            if let Some(port) = port {
                settings.server.port = port;
            }
            serve(settings, db, telemetry).await
        }
        Command::Ingest { file } => ingest(&db, &file),
        Command::Run { workspace_id } => run(&settings, &db, WorkspaceId::from_raw(workspace_id)).await,
        Command::Search {
            query,
            limit,
            workspace,
        } => search(&db, &query, limit, workspace.map(WorkspaceId::from_raw)),
    }
}

async fn serve(settings: ScoutSettings, db: Database, telemetry: Arc<TelemetryGuard>) -> Result<()> {
    let bus = Arc::new(EventBus::new());
    let orchestrator = Arc::new(EngineOrchestrator::from_settings(
        &settings,
        &db,
        Arc::clone(&bus),
    ));
    let state = AppState::new(&db, bus, orchestrator.clone()).with_telemetry(telemetry);

    let handle = scout_server::start(ServerConfig::from_settings(&settings.server), state)
        .await
        .context("Failed to start server")?;
    tracing::info!(
        port = handle.port,
        provider = ?settings.search.provider,
        "Scout server ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    let aborted = orchestrator.abort_all();
    tracing::info!(aborted, "Shutting down");
    handle.shutdown().await;
    Ok(())
}

fn ingest(db: &Database, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed: WorkspaceFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid workspace file: {}", file.display()))?;

    let repo = WorkspaceRepo::new(db.clone());
    let workspace = match parsed.id {
        Some(id) => {
            let workspace = Workspace::new(id, parsed.query, parsed.domains);
            repo.save(&workspace).context("Failed to save workspace")?;
            workspace
        }
        None => repo
            .create(&parsed.query, parsed.domains)
            .context("Failed to create workspace")?,
    };

    tracing::info!(
        workspace_id = %workspace.id,
        domains = workspace.domains.len(),
        queries = workspace.total_queries(),
        "workspace ingested"
    );
    println!("{}", workspace.id);
    Ok(())
}

async fn run(settings: &ScoutSettings, db: &Database, workspace_id: WorkspaceId) -> Result<()> {
    let bus = Arc::new(EventBus::new());
    let orchestrator = Arc::new(EngineOrchestrator::from_settings(settings, db, Arc::clone(&bus)));

    let watcher = {
        let orchestrator = Arc::clone(&orchestrator);
        let workspace_id = workspace_id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.abort(&workspace_id);
            }
        })
    };

    let printer = bus
        .subscribe(&SessionId::for_workspace(&workspace_id))
        .for_each(|event| async move {
            println!("{}", event.to_wire());
        });

    let (result, ()) = tokio::join!(orchestrator.run(&workspace_id), printer);
    watcher.abort();

    let summary = result.with_context(|| format!("Run failed for workspace {workspace_id}"))?;
    tracing::info!(
        domains = summary.domains,
        queries = summary.queries,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "run complete"
    );
    Ok(())
}

fn search(db: &Database, query: &str, limit: u32, workspace: Option<WorkspaceId>) -> Result<()> {
    let hits = DocumentRepo::new(db.clone())
        .search(query, workspace.as_ref(), limit.max(1))
        .context("Search failed")?;
    println!("{}", serde_json::to_string_pretty(&hits)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::parse_from(["scout", "--db-path", "/tmp/x.db", "run", "ws-1"]);
        assert_eq!(cli.db_path, Some(PathBuf::from("/tmp/x.db")));
        assert!(matches!(cli.command, Command::Run { ref workspace_id } if workspace_id == "ws-1"));

        let cli = Cli::parse_from(["scout", "search", "tidal", "--limit", "3"]);
        assert!(matches!(cli.command, Command::Search { limit: 3, .. }));
    }

    #[test]
    fn ingest_creates_then_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::in_memory().unwrap();
        let file = dir.path().join("ws.json");

        std::fs::write(
            &file,
            r#"{"id": "ws-fixed", "query": "heat pumps", "domains": [
                {"id": "d1", "name": "Thermo", "search_queries": [{"query": "COP", "rationale": "efficiency"}]}
            ]}"#,
        )
        .unwrap();
        ingest(&db, &file).unwrap();
        ingest(&db, &file).unwrap();

        let repo = WorkspaceRepo::new(db);
        let ws = repo.get(&WorkspaceId::from_raw("ws-fixed")).unwrap();
        assert_eq!(ws.total_queries(), 1);
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn ingest_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.json");
        std::fs::write(&file, "{not json").unwrap();
        assert!(ingest(&Database::in_memory().unwrap(), &file).is_err());
    }
}
