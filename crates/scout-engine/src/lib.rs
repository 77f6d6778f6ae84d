pub mod error;
pub mod event_bus;
pub mod executor;
pub mod runner;
pub mod tools;

pub mod testing;

pub use error::EngineError;
pub use event_bus::{EventBus, SessionGuard};
pub use executor::{Emitter, RetryPolicy, ToolExecutor};
pub use runner::{PhaseTracker, RunPhase, RunSummary, RunnerConfig, TaskGraphRunner};
pub use tools::{create_research_tool, BraveSearchTool, SimulatedResearchTool};
