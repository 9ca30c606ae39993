pub mod bootstrap;
pub mod game;
pub mod orchestrator;

pub use bootstrap::run;
pub use orchestrator::{RefreshSummary, UpdateCheck, UpdateOrchestrator, UpdateOutcome};
