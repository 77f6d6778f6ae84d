pub mod event_bridge;
pub mod handlers;
pub mod orchestrator;
pub mod server;

pub use handlers::ApiError;
pub use orchestrator::{EngineOrchestrator, ResearchOrchestrator, RunState, StartResult};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
