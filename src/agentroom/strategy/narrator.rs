//! Story-telling with one designated narrator.
//!
//! The narrator opens the scene when the owner starts, then alternates with the character
//! agents: a narration is forced once `narrator_interval` ticks have passed or
//! `max_agent_responses` characters have spoken since the last one.  Characters are picked by
//! [`CharacterSelection`] and always answer the most recent narration.  User messages are
//! treated as reader suggestions the narrator weaves into the story.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::prompt::{transcript, user_request};
use super::{new_session_id, Strategy};
use crate::chat_service::ChatService;
use crate::context::{ConversationContext, USER_MESSAGE_KEY};
use crate::message::{Message, MessageKind, USER_SENDER};

/// Number of recent messages shown to the narrator when advancing the story.
const NARRATION_WINDOW: usize = 5;

/// How the next character is chosen in a [`NarratorStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterSelection {
    /// Characters take turns in list order.
    RoundRobin,
    /// The character with the fewest messages in the history speaks next.
    LeastRecentlyUsed,
}

impl fmt::Display for CharacterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharacterSelection::RoundRobin => write!(f, "round_robin"),
            CharacterSelection::LeastRecentlyUsed => write!(f, "least_recently_used"),
        }
    }
}

impl FromStr for CharacterSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "round_robin" | "roundrobin" => Ok(CharacterSelection::RoundRobin),
            "least_recently_used" | "lru" => Ok(CharacterSelection::LeastRecentlyUsed),
            other => Err(format!("unknown character selection: {}", other)),
        }
    }
}

/// Narrator-led storytelling.
pub struct NarratorStrategy {
    chat: Arc<dyn ChatService>,
    session_id: String,
    narrator_agent: String,
    story_topic: String,
    narrator_interval: u32,
    max_agent_responses: u32,
    selection: CharacterSelection,
    ticks_since_last_narration: u32,
    agent_responses_since_narration: u32,
    current_scene: u32,
    next_character: usize,
    story_progression: Vec<String>,
}

impl NarratorStrategy {
    /// Narration every 3 ticks or after 2 character replies, whichever comes first.
    pub fn new(
        chat: Arc<dyn ChatService>,
        narrator_agent: impl Into<String>,
        story_topic: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            session_id: new_session_id("narrator"),
            narrator_agent: narrator_agent.into(),
            story_topic: story_topic.into(),
            narrator_interval: 3,
            max_agent_responses: 2,
            selection: CharacterSelection::RoundRobin,
            ticks_since_last_narration: 0,
            agent_responses_since_narration: 0,
            current_scene: 1,
            next_character: 0,
            story_progression: Vec::new(),
        }
    }

    pub fn with_narrator_interval(mut self, interval: u32) -> Self {
        self.narrator_interval = interval;
        self
    }

    pub fn with_max_agent_responses(mut self, max: u32) -> Self {
        self.max_agent_responses = max;
        self
    }

    pub fn with_selection(mut self, selection: CharacterSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn narrator_agent(&self) -> &str {
        &self.narrator_agent
    }

    pub fn current_scene(&self) -> u32 {
        self.current_scene
    }

    pub fn ticks_since_last_narration(&self) -> u32 {
        self.ticks_since_last_narration
    }

    pub fn agent_responses_since_narration(&self) -> u32 {
        self.agent_responses_since_narration
    }

    /// Every narration so far, joined by blank lines.
    pub fn story_so_far(&self) -> String {
        self.story_progression.join("\n\n")
    }

    fn needs_narration(&self) -> bool {
        self.ticks_since_last_narration >= self.narrator_interval
            || self.agent_responses_since_narration >= self.max_agent_responses
    }

    fn select_character(&mut self, characters: &[&String], ctx: &ConversationContext) -> String {
        match self.selection {
            CharacterSelection::RoundRobin => {
                let chosen = characters[self.next_character % characters.len()];
                self.next_character = (self.next_character + 1) % characters.len();
                chosen.clone()
            }
            CharacterSelection::LeastRecentlyUsed => {
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for message in ctx.history() {
                    *counts.entry(message.sender.as_str()).or_insert(0) += 1;
                }
                // min_by_key keeps the first minimum, so ties resolve in list order
                characters
                    .iter()
                    .min_by_key(|name| counts.get(name.as_str()).copied().unwrap_or(0))
                    .map(|name| (*name).clone())
                    .unwrap_or_default()
            }
        }
    }

    async fn narrate(&mut self, ctx: &ConversationContext) -> Message {
        let mut prompt = format!(
            "You are the narrator of a story about: {}\nCurrent scene: {}\n",
            self.story_topic, self.current_scene
        );
        if let Some(request) = user_request(ctx) {
            prompt.push_str(&format!("\nReader request to honour: \"{}\"\n", request));
        }
        prompt.push_str(&format!(
            "\nRecent events:\n{}\n\nAdvance the story. Decide what happens next, introduce new \
             elements or conflicts, leave openings for the other characters and keep the \
             narrative coherent.\n\nProvide the next narrative segment.",
            transcript(ctx.recent_messages(NARRATION_WINDOW))
        ));

        let response = self
            .chat
            .call_or_fallback(&self.narrator_agent, &self.session_id, &prompt, Some(ctx))
            .await;

        self.current_scene += 1;
        self.story_progression.push(response.clone());
        Message::narrator(self.narrator_agent.clone(), response)
            .with_metadata("action", "narrative_advance")
            .with_metadata("scene", self.current_scene)
    }

    async fn character_turn(
        &mut self,
        agents: &[String],
        ctx: &ConversationContext,
    ) -> Option<Message> {
        let characters: Vec<&String> = agents
            .iter()
            .filter(|a| **a != self.narrator_agent)
            .collect();
        if characters.is_empty() {
            return None;
        }
        let agent = self.select_character(&characters, ctx);

        let situation = ctx
            .messages_by_kind(MessageKind::Narrator)
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "The story continues...".to_string());

        let mut prompt = format!(
            "You are {}, a character in a story about: {}\n",
            agent, self.story_topic
        );
        if let Some(request) = user_request(ctx) {
            prompt.push_str(&format!("\nReader request: \"{}\"\n", request));
        }
        prompt.push_str(&format!(
            "\nCurrent situation (from the narrator):\n{}\n\nAs your character, respond to the \
             current situation. Keep your personality and motivations, react to recent events \
             and interact with the other characters.",
            situation
        ));

        let response = self
            .chat
            .call_or_fallback(&agent, &self.session_id, &prompt, Some(ctx))
            .await;

        Some(
            Message::agent(agent, response)
                .with_metadata("character_response", true)
                .with_metadata("scene", self.current_scene),
        )
    }
}

#[async_trait]
impl Strategy for NarratorStrategy {
    fn name(&self) -> &str {
        "narrator"
    }

    async fn on_start(&mut self, ctx: &mut ConversationContext) -> Vec<Message> {
        ctx.set_topic(self.story_topic.clone());
        let prompt = format!(
            "Start a new story about: {}\n\nSet the scene, introduce the setting and the initial \
             situation. Make it engaging and open-ended so other characters can join.",
            self.story_topic
        );
        let response = self
            .chat
            .call_or_fallback(&self.narrator_agent, &self.session_id, &prompt, Some(&*ctx))
            .await;

        self.story_progression.push(response.clone());
        vec![Message::narrator(self.narrator_agent.clone(), response)
            .with_metadata("action", "story_start")
            .with_metadata("scene", self.current_scene)]
    }

    async fn tick(
        &mut self,
        agents: &[String],
        ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>> {
        if agents.is_empty() {
            return None;
        }

        let mut produced = Vec::new();
        if self.needs_narration() {
            produced.push(self.narrate(ctx).await);
            self.ticks_since_last_narration = 0;
            self.agent_responses_since_narration = 0;
        } else if let Some(reply) = self.character_turn(agents, ctx).await {
            produced.push(reply);
            self.agent_responses_since_narration += 1;
        }
        self.ticks_since_last_narration += 1;

        if produced.is_empty() {
            None
        } else {
            Some(produced)
        }
    }

    async fn handle_user_message(
        &mut self,
        text: &str,
        ctx: &mut ConversationContext,
    ) -> Vec<Message> {
        ctx.update_memory(USER_MESSAGE_KEY, text);
        let prompt = format!(
            "A reader suggests: {}\n\nAs the narrator, incorporate this suggestion into the story \
             in a natural and interesting way.",
            text
        );
        let response = self
            .chat
            .call_or_fallback(&self.narrator_agent, &self.session_id, &prompt, Some(&*ctx))
            .await;
        self.story_progression.push(response.clone());
        self.ticks_since_last_narration = 0;
        self.agent_responses_since_narration = 0;

        vec![
            Message::user(USER_SENDER, text).with_metadata("influence_story", true),
            Message::narrator(self.narrator_agent.clone(), response)
                .with_metadata("action", "user_influence")
                .with_metadata("scene", self.current_scene),
        ]
    }
}
