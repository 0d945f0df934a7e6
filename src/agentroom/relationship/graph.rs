//! Directed, weighted graph of pairwise sentiment.
//!
//! Every edge `(from, to)` holds a value in `[-1, 1]` describing how `from` feels about `to`.
//! Edges are created lazily at `0.0` the first time they are touched and every update is
//! clamped, whatever the size (or sign, or finiteness) of the delta.
//!
//! ```rust
//! use agentroom::relationship::{RelationshipGraph, RelationshipType};
//!
//! let mut graph = RelationshipGraph::new();
//! graph.update_relationship("Alice", "Bob", 0.3, "agreed", "test");
//! graph.update_relationship("Alice", "Bob", 5.0, "adversarial", "test");
//!
//! assert_eq!(graph.value("Alice", "Bob"), 1.0);
//! assert_eq!(graph.relationship_type("Alice", "Bob"), RelationshipType::Friendly);
//! assert_eq!(graph.value("Bob", "Alice"), 0.0);
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of deltas remembered per edge.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Number of deltas included per edge in a [`GraphSnapshot`].
const SNAPSHOT_HISTORY: usize = 10;

/// Values strictly above this count as positive edges in [`NetworkStats`], strictly below its
/// negation as negative ones.
const STATS_THRESHOLD: f64 = 0.2;

/// Coarse label for an edge value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Friendly,
    Trusting,
    Neutral,
    Suspicious,
    Hostile,
}

impl RelationshipType {
    /// Label for `value`: friendly ≥ 0.5, trusting ≥ 0.2, neutral ≥ -0.2,
    /// suspicious ≥ -0.5, hostile below.
    pub fn from_value(value: f64) -> Self {
        if value >= 0.5 {
            RelationshipType::Friendly
        } else if value >= 0.2 {
            RelationshipType::Trusting
        } else if value >= -0.2 {
            RelationshipType::Neutral
        } else if value >= -0.5 {
            RelationshipType::Suspicious
        } else {
            RelationshipType::Hostile
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Friendly => "friendly",
            RelationshipType::Trusting => "trusting",
            RelationshipType::Neutral => "neutral",
            RelationshipType::Suspicious => "suspicious",
            RelationshipType::Hostile => "hostile",
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded change of an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipChange {
    pub timestamp: DateTime<Utc>,
    pub old_value: f64,
    pub new_value: f64,
    pub delta: f64,
    pub reason: String,
    pub source: String,
}

/// A directed edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    pub value: f64,
    pub history: VecDeque<RelationshipChange>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Relationship {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            value: 0.0,
            history: VecDeque::new(),
            last_updated: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Apply `delta`, clamp into `[-1, 1]` and record the change.  Returns the change that
    /// was actually applied.  A NaN delta leaves the value untouched.
    pub fn update(&mut self, delta: f64, reason: &str, source: &str, history_cap: usize) -> f64 {
        let old_value = self.value;
        let new_value = if delta.is_nan() {
            old_value
        } else {
            (old_value + delta).clamp(-1.0, 1.0)
        };
        self.value = new_value;
        self.last_updated = Utc::now();

        self.history.push_back(RelationshipChange {
            timestamp: self.last_updated,
            old_value,
            new_value,
            delta,
            reason: reason.to_string(),
            source: source.to_string(),
        });
        while self.history.len() > history_cap.max(1) {
            self.history.pop_front();
        }
        new_value - old_value
    }

    pub fn relationship_type(&self) -> RelationshipType {
        RelationshipType::from_value(self.value)
    }
}

/// Aggregate view over all edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkStats {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub average_value: f64,
    /// Node with the highest sum of inbound values.
    pub most_popular: Option<String>,
    /// Node with the highest sum of absolute inbound values.
    pub most_controversial: Option<String>,
    pub positive_relationships: usize,
    pub negative_relationships: usize,
    pub neutral_relationships: usize,
}

/// Serializable edge with a trimmed history.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeSnapshot {
    pub from: String,
    pub to: String,
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: RelationshipType,
    pub last_updated: DateTime<Utc>,
    pub history: Vec<RelationshipChange>,
    pub metadata: HashMap<String, Value>,
}

/// Serializable view of a whole graph.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<String>,
    pub edges: BTreeMap<String, BTreeMap<String, EdgeSnapshot>>,
    pub stats: NetworkStats,
}

/// Adjacency map of [`Relationship`]s.
#[derive(Debug, Clone)]
pub struct RelationshipGraph {
    nodes: Vec<String>,
    edges: BTreeMap<String, BTreeMap<String, Relationship>>,
    history_cap: usize,
}

impl Default for RelationshipGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: BTreeMap::new(),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }

    /// Limit the number of changes remembered per edge.
    pub fn with_history_cap(mut self, history_cap: usize) -> Self {
        self.history_cap = history_cap.max(1);
        self
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn add_node(&mut self, name: &str) {
        if !self.nodes.iter().any(|n| n == name) {
            self.nodes.push(name.to_string());
        }
    }

    /// The edge `(from, to)`, created at `0.0` if it does not exist yet.
    pub fn get_relationship(&mut self, from: &str, to: &str) -> &mut Relationship {
        self.add_node(from);
        self.add_node(to);
        self.edges
            .entry(from.to_string())
            .or_default()
            .entry(to.to_string())
            .or_insert_with(|| Relationship::new(from, to))
    }

    /// The edge `(from, to)` if it has been touched before.
    pub fn relationship(&self, from: &str, to: &str) -> Option<&Relationship> {
        self.edges.get(from).and_then(|targets| targets.get(to))
    }

    /// Current value of `(from, to)`, `0.0` for untouched edges.
    pub fn value(&self, from: &str, to: &str) -> f64 {
        self.relationship(from, to).map(|r| r.value).unwrap_or(0.0)
    }

    pub fn relationship_type(&self, from: &str, to: &str) -> RelationshipType {
        RelationshipType::from_value(self.value(from, to))
    }

    /// Apply `delta` to `(from, to)`.  Returns the change actually applied after clamping.
    pub fn update_relationship(
        &mut self,
        from: &str,
        to: &str,
        delta: f64,
        reason: &str,
        source: &str,
    ) -> f64 {
        let cap = self.history_cap;
        self.get_relationship(from, to)
            .update(delta, reason, source, cap)
    }

    /// Outgoing edge values of `entity`.
    pub fn all_relationships(&self, entity: &str) -> BTreeMap<String, f64> {
        self.edges
            .get(entity)
            .map(|targets| {
                targets
                    .iter()
                    .map(|(to, rel)| (to.clone(), rel.value))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Pull every edge toward zero by `rate` (clamped into `[0, 1]`).
    pub fn decay(&mut self, rate: f64) {
        if !rate.is_finite() || rate <= 0.0 {
            return;
        }
        let keep = 1.0 - rate.min(1.0);
        for targets in self.edges.values_mut() {
            for rel in targets.values_mut() {
                rel.value = (rel.value * keep).clamp(-1.0, 1.0);
            }
        }
    }

    fn values(&self) -> impl Iterator<Item = &Relationship> {
        self.edges.values().flat_map(|targets| targets.values())
    }

    /// Totals, average and extremes over all edges.
    pub fn network_stats(&self) -> NetworkStats {
        if self.nodes.is_empty() {
            return NetworkStats::default();
        }

        let values: Vec<f64> = self.values().map(|r| r.value).collect();
        let average_value = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };

        let mut popularity: HashMap<&str, f64> = HashMap::new();
        let mut controversy: HashMap<&str, f64> = HashMap::new();
        for rel in self.values() {
            *popularity.entry(rel.to.as_str()).or_insert(0.0) += rel.value;
            *controversy.entry(rel.to.as_str()).or_insert(0.0) += rel.value.abs();
        }

        NetworkStats {
            total_entities: self.nodes.len(),
            total_relationships: values.len(),
            average_value,
            most_popular: self.first_max(&popularity),
            most_controversial: self.first_max(&controversy),
            positive_relationships: values.iter().filter(|v| **v > STATS_THRESHOLD).count(),
            negative_relationships: values.iter().filter(|v| **v < -STATS_THRESHOLD).count(),
            neutral_relationships: values
                .iter()
                .filter(|v| (-STATS_THRESHOLD..=STATS_THRESHOLD).contains(*v))
                .count(),
        }
    }

    /// Node with the highest score; nodes without inbound edges score `0.0` and ties go to
    /// the earliest node.
    fn first_max(&self, scores: &HashMap<&str, f64>) -> Option<String> {
        let mut best: Option<(&str, f64)> = None;
        for node in &self.nodes {
            let score = scores.get(node.as_str()).copied().unwrap_or(0.0);
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((node.as_str(), score)),
            }
        }
        best.map(|(name, _)| name.to_string())
    }

    /// Serializable view with the last few changes of every edge.
    pub fn snapshot(&self) -> GraphSnapshot {
        let edges = self
            .edges
            .iter()
            .map(|(from, targets)| {
                let targets = targets
                    .iter()
                    .map(|(to, rel)| {
                        let skip = rel.history.len().saturating_sub(SNAPSHOT_HISTORY);
                        (
                            to.clone(),
                            EdgeSnapshot {
                                from: rel.from.clone(),
                                to: rel.to.clone(),
                                value: rel.value,
                                kind: rel.relationship_type(),
                                last_updated: rel.last_updated,
                                history: rel.history.iter().skip(skip).cloned().collect(),
                                metadata: rel.metadata.clone(),
                            },
                        )
                    })
                    .collect();
                (from.clone(), targets)
            })
            .collect();

        GraphSnapshot {
            nodes: self.nodes.clone(),
            edges,
            stats: self.network_stats(),
        }
    }
}
