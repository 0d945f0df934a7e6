//! Per-room relationship bookkeeping on top of [`RelationshipGraph`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::analyzer::{AnalysisResult, HeuristicAnalyzer, RelationshipAnalyzer};
use super::graph::{GraphSnapshot, NetworkStats, RelationshipGraph, RelationshipType};
use crate::event::RelationshipEvent;
use crate::message::Message;
use crate::pipeline::Fact;

/// Updates kept in the manager-level log.
const HISTORY_LIMIT: usize = 1000;

/// Updates included in [`RelationshipState`].
const STATE_HISTORY: usize = 100;

/// Undrained events kept before the oldest are dropped.
const PENDING_EVENT_LIMIT: usize = 1000;

const SUPPORTIVE_PREDICATES: &[&str] = &[
    "agreed_with",
    "agrees_with",
    "supported",
    "supports",
    "suggested",
    "thanked",
    "praised",
];

const OPPOSING_PREDICATES: &[&str] = &[
    "disagreed",
    "disagreed_with",
    "disagrees_with",
    "opposed",
    "opposes",
    "criticized",
];

/// Signed delta for a fact predicate: +0.1 supportive, -0.1 opposing, +0.05 anything else.
pub fn predicate_delta(predicate: &str) -> f64 {
    let predicate = predicate.trim().to_lowercase().replace(' ', "_");
    if SUPPORTIVE_PREDICATES.contains(&predicate.as_str()) {
        0.1
    } else if OPPOSING_PREDICATES.contains(&predicate.as_str()) {
        -0.1
    } else {
        0.05
    }
}

/// One applied update, as kept in the manager log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipUpdate {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    /// Requested delta.
    pub delta: f64,
    /// Delta left after clamping.
    pub applied: f64,
    pub new_value: f64,
    pub reason: String,
    pub source: String,
}

/// Relationships of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelationshipSummary {
    pub entity: String,
    pub total_relationships: usize,
    pub average_value: f64,
    pub most_positive: Option<(String, f64)>,
    pub most_negative: Option<(String, f64)>,
    pub relationships: BTreeMap<String, f64>,
}

/// Serializable view of a manager.
#[derive(Debug, Clone, Serialize)]
pub struct RelationshipState {
    pub graph: GraphSnapshot,
    pub history: Vec<RelationshipUpdate>,
    pub stats: NetworkStats,
}

/// Applies facts and analysed messages to a [`RelationshipGraph`].
///
/// ```rust
/// use agentroom::relationship::{RelationshipManager, RelationshipType};
///
/// let mut manager = RelationshipManager::new();
/// manager.register_participants(["Alice", "Bob"]);
/// for _ in 0..3 {
///     manager.update_relationship("Alice", "Bob", 0.1, "helped", "example");
/// }
/// assert_eq!(manager.relationship_type("Alice", "Bob"), RelationshipType::Trusting);
/// ```
pub struct RelationshipManager {
    graph: RelationshipGraph,
    analyzer: Arc<dyn RelationshipAnalyzer>,
    participants: Vec<String>,
    history: VecDeque<RelationshipUpdate>,
    decay_rate: f64,
    pending_events: VecDeque<RelationshipEvent>,
}

impl Default for RelationshipManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationshipManager {
    /// Empty graph analysed by a [`HeuristicAnalyzer`], no decay.
    pub fn new() -> Self {
        Self {
            graph: RelationshipGraph::new(),
            analyzer: Arc::new(HeuristicAnalyzer::new()),
            participants: Vec::new(),
            history: VecDeque::new(),
            decay_rate: 0.0,
            pending_events: VecDeque::new(),
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn RelationshipAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Fraction every edge loses toward zero after each processed message.
    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = if decay_rate.is_finite() {
            decay_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn with_history_cap(mut self, history_cap: usize) -> Self {
        self.graph = self.graph.with_history_cap(history_cap);
        self
    }

    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }

    /// Shared handle on the analyzer, for analysing messages without holding the manager.
    pub fn analyzer(&self) -> Arc<dyn RelationshipAnalyzer> {
        self.analyzer.clone()
    }

    fn push_event(&mut self, event: RelationshipEvent) {
        self.pending_events.push_back(event);
        while self.pending_events.len() > PENDING_EVENT_LIMIT {
            self.pending_events.pop_front();
        }
    }

    /// Drain the events recorded since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<RelationshipEvent> {
        self.pending_events.drain(..).collect()
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    pub fn register_participant(&mut self, name: &str) {
        if !self.participants.iter().any(|p| p == name) {
            self.participants.push(name.to_string());
            self.push_event(RelationshipEvent::ParticipantAdded {
                name: name.to_string(),
            });
        }
        self.graph.add_node(name);
    }

    pub fn register_participants<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.register_participant(name.as_ref());
        }
    }

    /// Apply `delta` to `(from, to)` and log it.  Returns the new value.
    pub fn update_relationship(
        &mut self,
        from: &str,
        to: &str,
        delta: f64,
        reason: &str,
        source: &str,
    ) -> f64 {
        let old_value = self.graph.value(from, to);
        let applied = self
            .graph
            .update_relationship(from, to, delta, reason, source);
        let new_value = self.graph.value(from, to);

        self.history.push_back(RelationshipUpdate {
            timestamp: Utc::now(),
            from: from.to_string(),
            to: to.to_string(),
            delta,
            applied,
            new_value,
            reason: reason.to_string(),
            source: source.to_string(),
        });
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }

        log::debug!(
            "relationship {} -> {}: {:+.3} ({}) = {:.3}",
            from,
            to,
            applied,
            reason,
            new_value
        );

        self.push_event(RelationshipEvent::RelationshipUpdated {
            from: from.to_string(),
            to: to.to_string(),
            old_value,
            new_value,
            reason: reason.to_string(),
            source: source.to_string(),
        });
        let previous = RelationshipType::from_value(old_value);
        let current = RelationshipType::from_value(new_value);
        if previous != current {
            log::info!(
                "relationship {} -> {} is now {} ({:.3})",
                from,
                to,
                current,
                new_value
            );
            self.push_event(RelationshipEvent::ThresholdReached {
                from: from.to_string(),
                to: to.to_string(),
                previous,
                current,
                value: new_value,
            });
        }
        new_value
    }

    /// Apply every fact whose subject and object are two distinct names of `participants`.
    /// Returns the number of facts applied.
    pub fn update_from_facts(&mut self, facts: &[Fact], participants: &[String]) -> usize {
        let mut applied = 0;
        for fact in facts {
            let known = |name: &str| participants.iter().any(|p| p == name);
            if fact.subject == fact.object || !known(&fact.subject) || !known(&fact.object) {
                continue;
            }
            let reason = format!("{} {} {}", fact.subject, fact.predicate, fact.object);
            self.update_relationship(
                &fact.subject,
                &fact.object,
                predicate_delta(&fact.predicate),
                &reason,
                &fact.source,
            );
            applied += 1;
        }
        applied
    }

    /// Analyse `message` and apply the scaled impacts from `sender` to each listener that is
    /// one of `participants`.  Decay, when configured, runs afterwards.
    pub async fn process_message(
        &mut self,
        message: &str,
        sender: &str,
        participants: &[String],
        context: &[Message],
    ) -> Option<AnalysisResult> {
        let result = self
            .analyzer
            .analyze_message(message, sender, participants, context)
            .await?;
        self.apply_analysis(&result, sender, participants);
        Some(result)
    }

    /// Apply an [`AnalysisResult`] obtained from [`analyzer`](Self::analyzer): the scaled
    /// impacts from `sender` to each listener in `participants`, then decay when configured.
    pub fn apply_analysis(
        &mut self,
        result: &AnalysisResult,
        sender: &str,
        participants: &[String],
    ) {
        let mut targets: Vec<(&String, &f64)> = result.impacts.iter().collect();
        targets.sort_by(|a, b| a.0.cmp(b.0));
        for (target, impact) in targets {
            if target == sender || !participants.contains(target) {
                continue;
            }
            let delta = impact * result.influence;
            if delta == 0.0 {
                continue;
            }
            self.update_relationship(sender, target, delta, &result.reason, &result.source);
        }

        if self.decay_rate > 0.0 {
            self.graph.decay(self.decay_rate);
        }
    }

    /// Pull every edge toward zero by `rate`.
    pub fn decay(&mut self, rate: f64) {
        self.graph.decay(rate);
    }

    pub fn relationship_value(&self, from: &str, to: &str) -> f64 {
        self.graph.value(from, to)
    }

    pub fn relationship_type(&self, from: &str, to: &str) -> RelationshipType {
        self.graph.relationship_type(from, to)
    }

    pub fn entity_relationships(&self, entity: &str) -> BTreeMap<String, f64> {
        self.graph.all_relationships(entity)
    }

    pub fn relationship_summary(&self, entity: &str) -> RelationshipSummary {
        let relationships = self.graph.all_relationships(entity);
        let average_value = if relationships.is_empty() {
            0.0
        } else {
            relationships.values().sum::<f64>() / relationships.len() as f64
        };
        let most_positive = relationships
            .iter()
            .filter(|(_, v)| **v > 0.0)
            .fold(None::<(&String, f64)>, |best, (name, v)| match best {
                Some((_, top)) if *v <= top => best,
                _ => Some((name, *v)),
            })
            .map(|(name, v)| (name.clone(), v));
        let most_negative = relationships
            .iter()
            .filter(|(_, v)| **v < 0.0)
            .fold(None::<(&String, f64)>, |best, (name, v)| match best {
                Some((_, low)) if *v >= low => best,
                _ => Some((name, *v)),
            })
            .map(|(name, v)| (name.clone(), v));

        RelationshipSummary {
            entity: entity.to_string(),
            total_relationships: relationships.len(),
            average_value,
            most_positive,
            most_negative,
            relationships,
        }
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.graph.network_stats()
    }

    /// Most recent updates first-to-last, at most `limit`.
    pub fn recent_updates(&self, limit: usize) -> Vec<RelationshipUpdate> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn full_state(&self) -> RelationshipState {
        RelationshipState {
            graph: self.graph.snapshot(),
            history: self.recent_updates(STATE_HISTORY),
            stats: self.graph.network_stats(),
        }
    }

    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.full_state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_table() {
        assert_eq!(predicate_delta("agreed_with"), 0.1);
        assert_eq!(predicate_delta("Agreed with"), 0.1);
        assert_eq!(predicate_delta("opposed"), -0.1);
        assert_eq!(predicate_delta("mentioned"), 0.05);
    }

    #[test]
    fn facts_between_strangers_are_ignored() {
        let mut manager = RelationshipManager::new();
        let participants = vec!["A".to_string(), "B".to_string()];
        let facts = vec![
            Fact::new("A", "agreed_with", "B"),
            Fact::new("A", "agreed_with", "Z"),
            Fact::new("A", "said", "hello there"),
            Fact::new("A", "agreed_with", "A"),
        ];
        assert_eq!(manager.update_from_facts(&facts, &participants), 1);
        assert!((manager.relationship_value("A", "B") - 0.1).abs() < 1e-9);
        assert_eq!(manager.relationship_value("A", "Z"), 0.0);
    }

    #[test]
    fn summary_picks_extremes() {
        let mut manager = RelationshipManager::new();
        manager.update_relationship("A", "B", 0.4, "r", "t");
        manager.update_relationship("A", "C", -0.3, "r", "t");
        manager.update_relationship("A", "D", 0.1, "r", "t");
        let summary = manager.relationship_summary("A");
        assert_eq!(summary.total_relationships, 3);
        assert_eq!(summary.most_positive, Some(("B".to_string(), 0.4)));
        assert_eq!(summary.most_negative, Some(("C".to_string(), -0.3)));
    }

    #[test]
    fn events_are_queued_until_taken() {
        let mut manager = RelationshipManager::new();
        manager.register_participants(["A", "B", "A"]);
        manager.update_relationship("A", "B", 0.1, "helped", "test");
        manager.update_relationship("A", "B", 0.15, "helped again", "test");

        let events = manager.take_events();
        assert_eq!(events.len(), 5);
        assert_eq!(
            events[0],
            RelationshipEvent::ParticipantAdded {
                name: "A".to_string()
            }
        );
        assert!(matches!(
            &events[2],
            RelationshipEvent::RelationshipUpdated { from, to, old_value, .. }
                if from == "A" && to == "B" && *old_value == 0.0
        ));
        assert!(matches!(
            &events[4],
            RelationshipEvent::ThresholdReached {
                previous: RelationshipType::Neutral,
                current: RelationshipType::Trusting,
                ..
            }
        ));
        assert!(manager.take_events().is_empty());
    }
}
