//! Pairwise relationship tracking between conversation participants.
//!
//! [`RelationshipGraph`] stores the directed edges, [`RelationshipManager`] feeds it from
//! extracted [`Fact`](crate::pipeline::Fact)s and from per-message analysis, and the
//! [`RelationshipAnalyzer`] implementations decide how a message moves the edges.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::chat_service::ChatService;

pub mod analyzer;
pub mod graph;
pub mod manager;

pub use analyzer::{
    AnalysisResult, HeuristicAnalyzer, LlmRelationshipAnalyzer, RelationshipAnalyzer, Tone,
};
pub use graph::{
    GraphSnapshot, NetworkStats, Relationship, RelationshipChange, RelationshipGraph,
    RelationshipType,
};
pub use manager::{RelationshipManager, RelationshipState, RelationshipSummary, RelationshipUpdate};

/// Which analyzer a room uses for per-message updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    #[default]
    Heuristic,
    Llm,
}

impl AnalyzerKind {
    /// Build the analyzer.  [`AnalyzerKind::Llm`] needs a chat service and an agent to ask;
    /// without them, or with an empty agent name, the heuristic analyzer is used.
    pub fn build(
        self,
        chat: Option<Arc<dyn ChatService>>,
        analyzer_agent: Option<&str>,
    ) -> Arc<dyn RelationshipAnalyzer> {
        match (self, chat, analyzer_agent) {
            (AnalyzerKind::Llm, Some(chat), Some(agent)) if !agent.is_empty() => Arc::new(
                LlmRelationshipAnalyzer::new(chat, agent).with_heuristic_fallback(),
            ),
            (AnalyzerKind::Llm, _, _) => {
                log::warn!("llm relationship analyzer unavailable, using heuristics");
                Arc::new(HeuristicAnalyzer::new())
            }
            (AnalyzerKind::Heuristic, _, _) => Arc::new(HeuristicAnalyzer::new()),
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerKind::Heuristic => write!(f, "heuristic"),
            AnalyzerKind::Llm => write!(f, "llm"),
        }
    }
}

impl FromStr for AnalyzerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(AnalyzerKind::Heuristic),
            "llm" => Ok(AnalyzerKind::Llm),
            other => Err(format!("unknown relationship analyzer: {}", other)),
        }
    }
}
