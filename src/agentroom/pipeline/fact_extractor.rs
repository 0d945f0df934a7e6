//! Structured triples pulled out of a discussion.
//!
//! With a chat service attached the extractor asks the first agent of the run for
//! `Subject | predicate | Object` lines.  Without one, or when the agent fails or answers
//! nothing usable, a keyword heuristic over the `speaker: content` transcript takes over.
//!
//! ```rust
//! use agentroom::pipeline::{Fact, FactExtractor};
//!
//! let facts = FactExtractor::extract_heuristic("A: I agree with B\nB: thanks");
//! assert!(facts.contains(&Fact::new("A", "agreed_with", "B").with_source("A")));
//! assert!(facts.contains(&Fact::new("B", "thanked", "A").with_source("B")));
//! ```

use std::sync::Arc;

use super::stage::{Fact, TaskState};
use crate::chat_service::ChatService;
use crate::relationship::analyzer::{mentioned_names, Tone};

const SESSION_ID: &str = "fact_extraction_session";

/// Characters of an utterance kept as the object of a `said` triple.
const SAID_CHARS: usize = 200;

/// Longest speaker label accepted in a transcript line.
const MAX_SPEAKER_CHARS: usize = 64;

pub struct FactExtractor {
    chat: Option<Arc<dyn ChatService>>,
}

impl Default for FactExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FactExtractor {
    /// Heuristic-only extractor.
    pub fn new() -> Self {
        Self { chat: None }
    }

    /// Ask an agent first, falling back to heuristics.
    pub fn with_chat_service(mut self, chat: Arc<dyn ChatService>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub async fn extract(&self, state: &TaskState) -> Vec<Fact> {
        let discussion = state.transcript();
        if discussion.trim().is_empty() {
            return Vec::new();
        }

        if let (Some(chat), Some(agent)) = (&self.chat, state.agent_names.first()) {
            let prompt = format!(
                "Extract structured facts from this discussion as SUBJECT -> PREDICATE -> OBJECT \
                 triplets.\n\nUSER REQUEST: {}\n\nDISCUSSION:\n{}\n\n\
                 Output ONLY triplets, one per line:\nSubject | predicate | Object\n\n\
                 Examples:\nUser | wants | build startup\nAgentName | suggested | market research\n\
                 AgentName | agreed_with | OtherAgent\n\nOutput (one triplet per line):",
                state.user_message, discussion
            );
            match chat.call(agent, SESSION_ID, &prompt, None).await {
                Ok(reply) => {
                    let facts = Self::parse_triplets(&reply);
                    if !facts.is_empty() {
                        return facts;
                    }
                    log::debug!("fact extraction by {} returned no triplets", agent);
                }
                Err(err) => log::warn!("fact extraction by {} failed: {}", agent, err),
            }
        }

        Self::extract_heuristic(&discussion)
    }

    /// Parse `Subject | predicate | Object` lines.  List markers are stripped, extra `|` stay
    /// in the object and lines with an empty part are dropped.
    pub fn parse_triplets(text: &str) -> Vec<Fact> {
        text.lines()
            .filter_map(|line| {
                let line = strip_list_marker(line.trim());
                let mut parts = line.splitn(3, '|').map(str::trim);
                let subject = parts.next()?;
                let predicate = parts.next()?;
                let object = parts.next()?;
                if subject.is_empty() || predicate.is_empty() || object.is_empty() {
                    return None;
                }
                Some(Fact::new(subject, predicate, object))
            })
            .collect()
    }

    /// Keyword extraction over a `speaker: content` transcript.
    ///
    /// Every utterance longer than three characters yields `(speaker, "said", content)`.
    /// Agreement, disagreement and gratitude additionally yield `agreed_with`,
    /// `disagreed_with` and `thanked` toward the speakers mentioned in the line, or toward
    /// the previous speaker when nobody is mentioned.
    pub fn extract_heuristic(text: &str) -> Vec<Fact> {
        let lines: Vec<(String, String)> = text.lines().filter_map(split_speaker).collect();

        let mut speakers: Vec<String> = Vec::new();
        for (speaker, _) in &lines {
            if !speakers.contains(speaker) {
                speakers.push(speaker.clone());
            }
        }

        let mut facts = Vec::new();
        let mut previous: Option<&str> = None;
        for (speaker, content) in &lines {
            if content.chars().count() > 3 {
                let said: String = content.chars().take(SAID_CHARS).collect();
                facts.push(Fact::new(speaker.as_str(), "said", said).with_source(speaker.as_str()));
            }

            let tone = Tone::of(content);
            let predicate = if tone.disagreement {
                Some("disagreed_with")
            } else if tone.agreement {
                Some("agreed_with")
            } else if tone.gratitude {
                Some("thanked")
            } else {
                None
            };

            if let Some(predicate) = predicate {
                let mut targets: Vec<&str> = mentioned_names(content, &speakers)
                    .into_iter()
                    .map(|s| s.as_str())
                    .filter(|s| *s != speaker.as_str())
                    .collect();
                if targets.is_empty() {
                    targets.extend(previous.filter(|p| *p != speaker.as_str()));
                }
                for target in targets {
                    facts.push(
                        Fact::new(speaker.as_str(), predicate, target).with_source(speaker.as_str()),
                    );
                }
            }

            previous = Some(speaker.as_str());
        }
        facts
    }
}

fn split_speaker(line: &str) -> Option<(String, String)> {
    let (speaker, content) = line.split_once(':')?;
    let speaker = speaker.trim();
    let content = content.trim();
    if speaker.is_empty() || content.is_empty() || speaker.chars().count() > MAX_SPEAKER_CHARS {
        return None;
    }
    Some((speaker.to_string(), content.to_string()))
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim_start_matches(|c: char| c == '-' || c == '*' || c == '•');
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    let rest = &line[digits..];
    if digits > 0 && (rest.starts_with('.') || rest.starts_with(')')) {
        rest[1..].trim_start()
    } else {
        line.trim_start()
    }
}
