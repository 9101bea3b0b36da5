use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceSource {
    Vector,
    Graph,
    Filter,
}

impl EvidenceSource {
    pub fn label(&self) -> &'static str {
        match self {
            EvidenceSource::Vector => "vector",
            EvidenceSource::Graph => "graph",
            EvidenceSource::Filter => "filter",
        }
    }
}

/// One unit of retrieval output, produced per query and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceItem {
    pub source: EvidenceSource,
    pub content: String,
    /// In [0, 1].
    pub confidence: f32,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl EvidenceItem {
    pub fn new(source: EvidenceSource, content: impl Into<String>, confidence: f32) -> Self {
        Self {
            source,
            content: content.into(),
            confidence: confidence.clamp(0.0, 1.0),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryState {
    Received,
    Planned,
    Executing,
    Synthesizing,
    Answered,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Complete,
    Failed,
    TimedOut,
    Skipped,
}

/// One record per strategy/stage executed, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub stage: String,
    pub detail: String,
    pub status: StepStatus,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub evidence: Vec<EvidenceItem>,
    pub confidence: f32,
    pub state: QueryState,
    /// True when prose synthesis could not be produced; `evidence` still
    /// holds the ranked raw results.
    pub synthesis_unavailable: bool,
    pub trace: Vec<TraceStep>,
}

#[derive(Debug, Error)]
pub enum StrategyError {
    /// Degrades to a zero-evidence contribution, never propagated.
    #[error("strategy timed out")]
    Timeout,

    #[error("strategy cancelled")]
    Cancelled,

    #[error("strategy backend error: {0}")]
    Backend(String),
}

impl From<graph::GraphError> for StrategyError {
    fn from(err: graph::GraphError) -> Self {
        StrategyError::Backend(err.to_string())
    }
}
