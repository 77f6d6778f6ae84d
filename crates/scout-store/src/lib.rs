pub mod database;
pub mod documents;
pub mod error;
pub mod schema;
pub mod source;
pub mod workspaces;

pub use database::Database;
pub use documents::{Document, DocumentRepo, NewDocument, SearchHit};
pub use error::StoreError;
pub use source::StoreWorkspaceSource;
pub use workspaces::{WorkspaceRepo, WorkspaceSummary};
