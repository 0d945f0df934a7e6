//! Message analyzers turning an utterance into per-listener sentiment impacts.
//!
//! Two implementations ship with the crate:
//!
//! * [`HeuristicAnalyzer`] scans the text for a small keyword lexicon (English and Russian)
//!   and never calls out to a backend.
//! * [`LlmRelationshipAnalyzer`] asks an agent through a [`ChatService`] for a JSON verdict.
//!
//! Analyzers return raw impacts together with the influence coefficient the manager should
//! scale them by.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chat_service::ChatService;
use crate::message::Message;

/// Influence applied to heuristic impacts.
pub const HEURISTIC_INFLUENCE: f64 = 0.5;

/// Influence applied to LLM impacts.
pub const LLM_INFLUENCE: f64 = 0.3;

const AGREEMENT_WEIGHT: f64 = 0.15;
const DISAGREEMENT_WEIGHT: f64 = -0.15;
const GRATITUDE_WEIGHT: f64 = 0.1;
const INTEREST_WEIGHT: f64 = 0.05;

/// Drift toward every listener for simply taking part.
pub const PARTICIPATION_BASELINE: f64 = 0.02;

/// Extra drift toward whoever spoke right before.
pub const PREVIOUS_SPEAKER_BONUS: f64 = 0.03;

const AGREEMENT: &[&str] = &[
    "agree",
    "agreed",
    "i concur",
    "exactly",
    "good point",
    "great idea",
    "well said",
    "you are right",
    "you re right",
    "support",
    "согласен",
    "согласна",
    "поддерживаю",
    "точно",
    "верно",
    "правильно",
    "хорошая идея",
];

const DISAGREEMENT: &[&str] = &[
    "disagree",
    "don t agree",
    "do not agree",
    "not convinced",
    "that s wrong",
    "you are wrong",
    "you re wrong",
    "i doubt",
    "object",
    "не согласен",
    "не согласна",
    "не прав",
    "неправильно",
    "неверно",
    "сомневаюсь",
];

const GRATITUDE: &[&str] = &[
    "thanks",
    "thank you",
    "thank",
    "grateful",
    "appreciate",
    "спасибо",
    "благодарю",
];

const INTEREST: &[&str] = &[
    "interesting",
    "curious",
    "tell me more",
    "fascinating",
    "интересно",
    "любопытно",
];

/// Keyword categories found in a piece of text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tone {
    pub agreement: bool,
    pub disagreement: bool,
    pub gratitude: bool,
    pub interest: bool,
}

impl Tone {
    /// Scan `text`.  Disagreement wins over agreement ("don't agree" contains "agree").
    pub fn of(text: &str) -> Self {
        let normalized = normalize(text);
        let disagreement = contains_any(&normalized, DISAGREEMENT);
        Self {
            agreement: !disagreement && contains_any(&normalized, AGREEMENT),
            disagreement,
            gratitude: contains_any(&normalized, GRATITUDE),
            interest: contains_any(&normalized, INTEREST),
        }
    }

    /// Signed sum of the category weights.
    pub fn delta(&self) -> f64 {
        let mut delta = 0.0;
        if self.agreement {
            delta += AGREEMENT_WEIGHT;
        }
        if self.disagreement {
            delta += DISAGREEMENT_WEIGHT;
        }
        if self.gratitude {
            delta += GRATITUDE_WEIGHT;
        }
        if self.interest {
            delta += INTEREST_WEIGHT;
        }
        delta
    }

    fn emotions(&self) -> HashMap<String, f64> {
        let mut emotions = HashMap::new();
        if self.agreement {
            emotions.insert("agreement".to_string(), AGREEMENT_WEIGHT);
        }
        if self.disagreement {
            emotions.insert("disagreement".to_string(), DISAGREEMENT_WEIGHT.abs());
        }
        if self.gratitude {
            emotions.insert("gratitude".to_string(), GRATITUDE_WEIGHT);
        }
        if self.interest {
            emotions.insert("interest".to_string(), INTEREST_WEIGHT);
        }
        emotions
    }

    fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.agreement {
            labels.push("agreement");
        }
        if self.disagreement {
            labels.push("disagreement");
        }
        if self.gratitude {
            labels.push("gratitude");
        }
        if self.interest {
            labels.push("interest");
        }
        labels
    }
}

/// Lowercase, split on anything that is not alphanumeric and re-join with single spaces,
/// padded on both sides so phrase lookups can match on word boundaries.
fn normalize(text: &str) -> String {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect();
    format!(" {} ", words.join(" "))
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let needle = normalize(phrase);
    !needle.trim().is_empty() && normalized.contains(&needle)
}

fn contains_any(normalized: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(normalized, p))
}

/// Names from `candidates` mentioned as whole words in `text` (case-insensitive).
pub fn mentioned_names<'a>(text: &str, candidates: &'a [String]) -> Vec<&'a String> {
    let normalized = normalize(text);
    candidates
        .iter()
        .filter(|name| contains_phrase(&normalized, name))
        .collect()
}

/// Outcome of analysing one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub sender: String,
    /// Raw, unscaled delta per listener.
    pub impacts: HashMap<String, f64>,
    pub sentiment: f64,
    pub emotions: HashMap<String, f64>,
    pub reason: String,
    /// Coefficient the manager multiplies `impacts` by.
    pub influence: f64,
    /// Which analyzer produced the result.
    pub source: String,
}

/// Pluggable message analysis.
#[async_trait]
pub trait RelationshipAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    /// Analyse `message` from `sender` toward the other `participants`.  `context` holds the
    /// recent history preceding the message.  `None` means nobody is affected.
    async fn analyze_message(
        &self,
        message: &str,
        sender: &str,
        participants: &[String],
        context: &[Message],
    ) -> Option<AnalysisResult>;
}

/// Keyword-driven analyzer.
///
/// ```rust
/// use agentroom::relationship::{HeuristicAnalyzer, RelationshipAnalyzer};
///
/// #[tokio::main]
/// async fn main() {
///     let participants = vec!["Alice".to_string(), "Bob".to_string(), "Carol".to_string()];
///     let result = HeuristicAnalyzer::new()
///         .analyze_message("I agree with Bob", "Alice", &participants, &[])
///         .await
///         .unwrap();
///
///     assert!(result.impacts["Bob"] > result.impacts["Carol"]);
///     assert!(result.impacts["Carol"] > 0.0);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        HeuristicAnalyzer
    }

    /// Synchronous core of [`RelationshipAnalyzer::analyze_message`].
    pub fn analyze(
        &self,
        message: &str,
        sender: &str,
        participants: &[String],
        context: &[Message],
    ) -> Option<AnalysisResult> {
        let listeners: Vec<String> = participants
            .iter()
            .filter(|p| p.as_str() != sender)
            .cloned()
            .collect();
        if listeners.is_empty() {
            return None;
        }

        let tone = Tone::of(message);
        let delta = tone.delta();
        let mentioned = mentioned_names(message, &listeners);

        let mut impacts: HashMap<String, f64> = listeners
            .iter()
            .map(|l| (l.clone(), PARTICIPATION_BASELINE))
            .collect();

        if delta != 0.0 {
            let targets: Vec<&String> = if mentioned.is_empty() {
                listeners.iter().collect()
            } else {
                mentioned.clone()
            };
            let share = delta / targets.len() as f64;
            for target in targets {
                *impacts.entry(target.clone()).or_insert(0.0) += share;
            }
        }

        let previous_speaker = context
            .iter()
            .rev()
            .map(|m| m.sender.as_str())
            .find(|s| *s != sender);
        if let Some(previous) = previous_speaker {
            if let Some(impact) = impacts.get_mut(previous) {
                *impact += PREVIOUS_SPEAKER_BONUS;
            }
        }

        let labels = tone.labels();
        let reason = if labels.is_empty() {
            "participation".to_string()
        } else if mentioned.is_empty() {
            labels.join(", ")
        } else {
            format!(
                "{} toward {}",
                labels.join(", "),
                mentioned
                    .iter()
                    .map(|m| m.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        };

        Some(AnalysisResult {
            sender: sender.to_string(),
            impacts,
            sentiment: delta.clamp(-1.0, 1.0),
            emotions: tone.emotions(),
            reason,
            influence: HEURISTIC_INFLUENCE,
            source: self.name().to_string(),
        })
    }
}

#[async_trait]
impl RelationshipAnalyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze_message(
        &self,
        message: &str,
        sender: &str,
        participants: &[String],
        context: &[Message],
    ) -> Option<AnalysisResult> {
        self.analyze(message, sender, participants, context)
    }
}

#[derive(Debug, Deserialize)]
struct LlmVerdict {
    #[serde(default)]
    impacts: HashMap<String, f64>,
    #[serde(default)]
    sentiment: f64,
    #[serde(default)]
    emotions: HashMap<String, f64>,
    #[serde(default)]
    reason: String,
}

/// Analyzer asking an agent for a JSON verdict.
///
/// The agent must answer with an object shaped like
/// `{"impacts": {"Bob": 0.4}, "sentiment": 0.5, "emotions": {"joy": 0.7}, "reason": "..."}`.
/// Anything before the first `{` and after the last `}` is ignored.  When the call or the
/// parse fails the optional fallback analyzer answers instead.
pub struct LlmRelationshipAnalyzer {
    chat: Arc<dyn ChatService>,
    analyzer_agent: String,
    session_id: String,
    fallback: Option<HeuristicAnalyzer>,
}

impl LlmRelationshipAnalyzer {
    pub fn new(chat: Arc<dyn ChatService>, analyzer_agent: impl Into<String>) -> Self {
        Self {
            chat,
            analyzer_agent: analyzer_agent.into(),
            session_id: "relationship_analysis_session".to_string(),
            fallback: None,
        }
    }

    /// Answer with the heuristic analyzer whenever the agent is unusable.
    pub fn with_heuristic_fallback(mut self) -> Self {
        self.fallback = Some(HeuristicAnalyzer::new());
        self
    }

    fn prompt(message: &str, sender: &str, listeners: &[String], context: &[Message]) -> String {
        let recent = context
            .iter()
            .rev()
            .take(5)
            .rev()
            .map(|m| m.transcript_line())
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "Analyse how this message affects the relationships between {} and the other \
             participants.\n\nRecent conversation:\n{}\n\nMessage from {}:\n{}\n\n\
             Participants: {}\n\nReply with JSON only:\n\
             {{\"impacts\": {{\"<participant>\": <delta between -1 and 1>}}, \
             \"sentiment\": <-1..1>, \"emotions\": {{\"<emotion>\": <0..1>}}, \
             \"reason\": \"<short explanation>\"}}",
            sender,
            recent,
            sender,
            message,
            listeners.join(", ")
        )
    }

    fn parse(
        &self,
        raw: &str,
        sender: &str,
        listeners: &[String],
    ) -> Result<AnalysisResult, String> {
        let start = raw.find('{').ok_or("no JSON object in reply")?;
        let end = raw.rfind('}').ok_or("no JSON object in reply")?;
        if end < start {
            return Err("malformed JSON object in reply".to_string());
        }
        let verdict: LlmVerdict =
            serde_json::from_str(&raw[start..=end]).map_err(|e| e.to_string())?;

        let impacts: HashMap<String, f64> = verdict
            .impacts
            .into_iter()
            .filter(|(name, delta)| listeners.contains(name) && delta.is_finite())
            .map(|(name, delta)| (name, delta.clamp(-1.0, 1.0)))
            .collect();

        Ok(AnalysisResult {
            sender: sender.to_string(),
            impacts,
            sentiment: if verdict.sentiment.is_finite() {
                verdict.sentiment.clamp(-1.0, 1.0)
            } else {
                0.0
            },
            emotions: verdict.emotions,
            reason: verdict.reason,
            influence: LLM_INFLUENCE,
            source: self.name().to_string(),
        })
    }

    fn fall_back(
        &self,
        message: &str,
        sender: &str,
        participants: &[String],
        context: &[Message],
    ) -> Option<AnalysisResult> {
        self.fallback
            .as_ref()
            .and_then(|h| h.analyze(message, sender, participants, context))
    }
}

#[async_trait]
impl RelationshipAnalyzer for LlmRelationshipAnalyzer {
    fn name(&self) -> &str {
        "llm"
    }

    async fn analyze_message(
        &self,
        message: &str,
        sender: &str,
        participants: &[String],
        context: &[Message],
    ) -> Option<AnalysisResult> {
        let listeners: Vec<String> = participants
            .iter()
            .filter(|p| p.as_str() != sender)
            .cloned()
            .collect();
        if listeners.is_empty() {
            return None;
        }

        let prompt = Self::prompt(message, sender, &listeners, context);
        let raw = match self
            .chat
            .call(&self.analyzer_agent, &self.session_id, &prompt, None)
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("relationship analysis call failed: {}", err);
                return self.fall_back(message, sender, participants, context);
            }
        };

        match self.parse(&raw, sender, &listeners) {
            Ok(result) => Some(result),
            Err(err) => {
                log::warn!("relationship analysis reply unusable: {}", err);
                self.fall_back(message, sender, participants, context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn negated_agreement_counts_as_disagreement() {
        let tone = Tone::of("I don't agree with that at all");
        assert!(tone.disagreement);
        assert!(!tone.agreement);
        assert!(tone.delta() < 0.0);
    }

    #[test]
    fn russian_keywords_are_recognised() {
        assert!(Tone::of("Полностью согласен!").agreement);
        assert!(Tone::of("Спасибо, коллеги").gratitude);
    }

    #[test]
    fn mentions_match_whole_words_only() {
        let candidates = names(&["Bob", "Al"]);
        let found = mentioned_names("bob, I think Alice is right", &candidates);
        assert_eq!(found, vec![&candidates[0]]);
    }

    #[test]
    fn neutral_message_still_drifts_toward_listeners() {
        let result = HeuristicAnalyzer::new()
            .analyze("The weather is cloudy.", "A", &names(&["A", "B", "C"]), &[])
            .unwrap();
        assert_eq!(result.impacts.len(), 2);
        assert!(result
            .impacts
            .values()
            .all(|v| (*v - PARTICIPATION_BASELINE).abs() < 1e-9));
        assert_eq!(result.reason, "participation");
    }

    #[test]
    fn previous_speaker_gets_a_bonus() {
        let context = vec![Message::agent("C", "hello"), Message::agent("A", "again")];
        let result = HeuristicAnalyzer::new()
            .analyze("ok", "A", &names(&["A", "B", "C"]), &context)
            .unwrap();
        assert!(result.impacts["C"] > result.impacts["B"]);
    }

    #[test]
    fn lone_speaker_has_no_listeners() {
        assert!(HeuristicAnalyzer::new()
            .analyze("I agree", "A", &names(&["A"]), &[])
            .is_none());
    }
}
