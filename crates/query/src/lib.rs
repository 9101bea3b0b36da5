pub mod evidence;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod strategies;

pub use evidence::{
    EvidenceItem, EvidenceSource, QueryResponse, QueryState, StepStatus, StrategyError, TraceStep,
};
pub use llm::{CompletionModel, OllamaCompletion};
pub use orchestrator::{
    ALL_STRATEGIES_FAILED_ANSWER, NO_EVIDENCE_ANSWER, Orchestrator, RetrievalConfig,
    SYNTHESIS_UNAVAILABLE_ANSWER, build_synthesis_prompt, overall_confidence, rank_evidence,
};
pub use planner::{FilterPattern, QueryPlan, StrategyToggles, plan_query};
pub use strategies::{CancelFlag, depth_confidence, filter_search, graph_search, vector_search};
