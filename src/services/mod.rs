pub mod execution;
pub mod journal;
pub mod orchestrator;
pub mod risk;
pub mod stats_reporter;

pub use execution::{ExecutionService, ExecutionStats};
pub use journal::{JournalSummary, TradeJournal};
pub use orchestrator::{Orchestrator, PipelineStats, StatsHandle};
pub use risk::{RiskGuard, RiskParameterUpdate};
pub use stats_reporter::StatsReporter;

#[cfg(test)]
mod execution_tests;
#[cfg(test)]
mod risk_tests;
