//! Decision-making helpers for the orchestration loop: agent selection,
//! decision drift detection and planning context deduplication.

pub mod adaptive;
pub mod context;
pub mod drift;

pub use adaptive::{AdaptiveOrchestrator, AgentRanking, AgentStats, OrchestratorConfig, Outcome};
pub use context::{DedupStats, Fact, FactOutcome, PlanningContextDeduplicator};
pub use drift::{
    canonical_json, canonicalize, stable_hash, DecisionEntry, DriftConfig, DriftFinding,
    DriftMitigator, DriftReport,
};
