use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{info, warn};

use graph::GraphService;
use index::{Embedder, VectorIndex};

use crate::evidence::{
    EvidenceItem, EvidenceSource, QueryResponse, QueryState, StepStatus, StrategyError, TraceStep,
};
use crate::llm::CompletionModel;
use crate::planner::{QueryPlan, StrategyToggles, plan_query};
use crate::strategies::{CancelFlag, filter_search, graph_search, vector_search};

pub const NO_EVIDENCE_ANSWER: &str =
    "No supporting evidence was found for this query; nothing in the knowledge graph matches it.";
pub const SYNTHESIS_UNAVAILABLE_ANSWER: &str =
    "Synthesis unavailable: returning the ranked evidence without a prose answer.";
pub const ALL_STRATEGIES_FAILED_ANSWER: &str =
    "Every retrieval strategy failed; no evidence could be collected for this query.";

#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub toggles: StrategyToggles,
    /// Top-k for the vector strategy.
    pub vector_k: usize,
    /// Traversal bound for the graph strategy.
    pub graph_depth: usize,
    /// Ranked evidence kept for synthesis.
    pub max_evidence: usize,
    /// Overall confidence is the mean of this many top items.
    pub confidence_top_n: usize,
    pub strategy_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            toggles: StrategyToggles::default(),
            vector_k: 10,
            graph_depth: 2,
            max_evidence: 10,
            confidence_top_n: 3,
            strategy_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
        }
    }
}

/// Plans which strategies to run, executes them concurrently with per-
/// strategy timeouts, and synthesizes ranked evidence into one answer.
///
/// State machine per query:
/// `received -> planned -> executing -> synthesizing -> answered`, with
/// `failed` on unrecoverable errors only (every strategy erroring out, or
/// the completion backend unreachable at synthesis time).
pub struct Orchestrator {
    graph: Arc<GraphService>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    completion: Option<Arc<dyn CompletionModel>>,
    config: RetrievalConfig,
}

type StrategyOutcome = (
    EvidenceSource,
    Result<Vec<EvidenceItem>, StrategyError>,
    u64,
);

impl Orchestrator {
    pub fn new(
        graph: Arc<GraphService>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        completion: Option<Arc<dyn CompletionModel>>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            graph,
            index,
            embedder,
            completion,
            config,
        }
    }

    pub async fn execute(&self, query: &str) -> QueryResponse {
        let mut trace = Vec::new();

        let plan_started = Instant::now();
        let plan = plan_query(query, self.config.toggles);
        trace.push(TraceStep {
            stage: "coordinator".to_string(),
            detail: format!("plan: {}", plan.describe()),
            status: StepStatus::Complete,
            elapsed_ms: plan_started.elapsed().as_millis() as u64,
        });

        if plan.strategies_planned() == 0 {
            trace.push(TraceStep {
                stage: "synthesis".to_string(),
                detail: "no strategies enabled for this query".to_string(),
                status: StepStatus::Skipped,
                elapsed_ms: 0,
            });
            return QueryResponse {
                answer: NO_EVIDENCE_ANSWER.to_string(),
                evidence: Vec::new(),
                confidence: 0.0,
                state: QueryState::Answered,
                synthesis_unavailable: false,
                trace,
            };
        }

        let (outcomes, cancelled) = self.run_strategies(query, &plan).await;

        let mut evidence = Vec::new();
        let mut backend_errors = 0;
        for source in [
            EvidenceSource::Vector,
            EvidenceSource::Graph,
            EvidenceSource::Filter,
        ] {
            let planned = match source {
                EvidenceSource::Vector => plan.run_vector,
                EvidenceSource::Graph => plan.run_graph,
                EvidenceSource::Filter => plan.run_filter,
            };
            if !planned {
                continue;
            }
            match outcomes.iter().find(|(s, _, _)| *s == source) {
                Some((_, Ok(items), elapsed_ms)) => {
                    trace.push(TraceStep {
                        stage: source.label().to_string(),
                        detail: format!("{} evidence items", items.len()),
                        status: StepStatus::Complete,
                        elapsed_ms: *elapsed_ms,
                    });
                    evidence.extend(items.iter().cloned());
                }
                Some((_, Err(StrategyError::Timeout), elapsed_ms)) => {
                    trace.push(TraceStep {
                        stage: source.label().to_string(),
                        detail: "timed out, contributing zero evidence".to_string(),
                        status: StepStatus::TimedOut,
                        elapsed_ms: *elapsed_ms,
                    });
                }
                Some((_, Err(StrategyError::Cancelled), elapsed_ms)) => {
                    trace.push(TraceStep {
                        stage: source.label().to_string(),
                        detail: "cancelled by query timeout".to_string(),
                        status: StepStatus::TimedOut,
                        elapsed_ms: *elapsed_ms,
                    });
                }
                Some((_, Err(err), elapsed_ms)) => {
                    warn!(strategy = source.label(), error = %err, "strategy failed");
                    backend_errors += 1;
                    trace.push(TraceStep {
                        stage: source.label().to_string(),
                        detail: format!("failed: {err}"),
                        status: StepStatus::Failed,
                        elapsed_ms: *elapsed_ms,
                    });
                }
                None => {
                    backend_errors += 1;
                    trace.push(TraceStep {
                        stage: source.label().to_string(),
                        detail: "strategy task aborted".to_string(),
                        status: StepStatus::Failed,
                        elapsed_ms: 0,
                    });
                }
            }
        }

        if cancelled {
            info!(query, "query timeout reached, synthesizing with partial evidence");
        }

        if backend_errors == plan.strategies_planned() {
            return QueryResponse {
                answer: ALL_STRATEGIES_FAILED_ANSWER.to_string(),
                evidence: Vec::new(),
                confidence: 0.0,
                state: QueryState::Failed,
                synthesis_unavailable: true,
                trace,
            };
        }

        let evidence = rank_evidence(evidence, self.config.max_evidence);
        let confidence = overall_confidence(&evidence, self.config.confidence_top_n);

        if evidence.is_empty() {
            trace.push(TraceStep {
                stage: "synthesis".to_string(),
                detail: "no evidence collected".to_string(),
                status: StepStatus::Skipped,
                elapsed_ms: 0,
            });
            return QueryResponse {
                answer: NO_EVIDENCE_ANSWER.to_string(),
                evidence,
                confidence: 0.0,
                state: QueryState::Answered,
                synthesis_unavailable: false,
                trace,
            };
        }

        let synth_started = Instant::now();
        let prompt = build_synthesis_prompt(query, &evidence);
        let answer = match &self.completion {
            Some(model) => model.complete(&prompt).await.ok().filter(|a| {
                !a.trim().is_empty()
            }),
            None => None,
        };
        let elapsed_ms = synth_started.elapsed().as_millis() as u64;

        match answer {
            Some(text) => {
                trace.push(TraceStep {
                    stage: "synthesis".to_string(),
                    detail: format!("answer from {} evidence items", evidence.len()),
                    status: StepStatus::Complete,
                    elapsed_ms,
                });
                QueryResponse {
                    answer: text.trim().to_string(),
                    evidence,
                    confidence,
                    state: QueryState::Answered,
                    synthesis_unavailable: false,
                    trace,
                }
            }
            None => {
                trace.push(TraceStep {
                    stage: "synthesis".to_string(),
                    detail: "completion backend unavailable".to_string(),
                    status: StepStatus::Failed,
                    elapsed_ms,
                });
                QueryResponse {
                    answer: SYNTHESIS_UNAVAILABLE_ANSWER.to_string(),
                    evidence,
                    confidence,
                    state: QueryState::Failed,
                    synthesis_unavailable: true,
                    trace,
                }
            }
        }
    }

    /// The strategies have no data dependency on each other: run them
    /// concurrently, each under its own timeout, and stop waiting when the
    /// query deadline passes.
    async fn run_strategies(&self, query: &str, plan: &QueryPlan) -> (Vec<StrategyOutcome>, bool) {
        let cancel = CancelFlag::new();
        let mut set: JoinSet<StrategyOutcome> = JoinSet::new();
        let strategy_timeout = self.config.strategy_timeout;

        if plan.run_vector {
            let index = Arc::clone(&self.index);
            let embedder = Arc::clone(&self.embedder);
            let query = query.to_string();
            let k = self.config.vector_k;
            let cancel = cancel.clone();
            set.spawn(async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(
                    strategy_timeout,
                    vector_search(&index, embedder.as_ref(), &query, k, &cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StrategyError::Timeout),
                };
                (
                    EvidenceSource::Vector,
                    result,
                    started.elapsed().as_millis() as u64,
                )
            });
        }

        if plan.run_graph {
            let graph = Arc::clone(&self.graph);
            let mentions = plan.entity_mentions.clone();
            let depth = self.config.graph_depth;
            let cancel = cancel.clone();
            set.spawn(async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(
                    strategy_timeout,
                    graph_search(&graph, &mentions, depth, &cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StrategyError::Timeout),
                };
                (
                    EvidenceSource::Graph,
                    result,
                    started.elapsed().as_millis() as u64,
                )
            });
        }

        if plan.run_filter {
            let graph = Arc::clone(&self.graph);
            let filters = plan.filters.clone();
            let cancel = cancel.clone();
            set.spawn(async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(
                    strategy_timeout,
                    filter_search(&graph, &filters, &cancel),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StrategyError::Timeout),
                };
                (
                    EvidenceSource::Filter,
                    result,
                    started.elapsed().as_millis() as u64,
                )
            });
        }

        let deadline = tokio::time::sleep(self.config.query_timeout);
        tokio::pin!(deadline);
        let mut outcomes = Vec::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                _ = &mut deadline, if !cancelled => {
                    cancelled = true;
                    cancel.cancel();
                }
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Ok(outcome)) => outcomes.push(outcome),
                    Some(Err(err)) => {
                        warn!(error = %err, "strategy task aborted");
                    }
                },
            }
        }

        (outcomes, cancelled)
    }
}

/// Pure reduction: rank by confidence descending and truncate. Ordering is
/// total so concurrent completion order cannot change the result.
pub fn rank_evidence(mut evidence: Vec<EvidenceItem>, max: usize) -> Vec<EvidenceItem> {
    evidence.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.label().cmp(b.source.label()))
            .then_with(|| a.content.cmp(&b.content))
    });
    evidence.truncate(max);
    evidence
}

/// Mean of the top-N evidence confidences, floored at zero evidence.
pub fn overall_confidence(evidence: &[EvidenceItem], top_n: usize) -> f32 {
    if evidence.is_empty() || top_n == 0 {
        return 0.0;
    }
    let take = top_n.min(evidence.len());
    let sum: f32 = evidence[..take].iter().map(|e| e.confidence).sum();
    sum / take as f32
}

/// Builds the synthesis prompt from ranked evidence. Pure; all I/O stays in
/// the completion client.
pub fn build_synthesis_prompt(query: &str, evidence: &[EvidenceItem]) -> String {
    let mut lines = String::new();
    for (i, item) in evidence.iter().enumerate() {
        lines.push_str(&format!(
            "[{}] ({}, confidence {:.2}) {}\n",
            i + 1,
            item.source.label(),
            item.confidence,
            item.content
        ));
    }

    format!(
        r#"You are answering a question using evidence retrieved from a knowledge graph.

EVIDENCE:
{}
QUESTION: {}

INSTRUCTIONS:
- Answer using only the evidence above; do not invent facts
- Mention every entity the evidence directly supports as an answer
- Cite evidence numbers like [1] where relevant
- If the evidence is insufficient, say so explicitly
- Keep the answer concise and factual

ANSWER:"#,
        lines, query
    )
}
