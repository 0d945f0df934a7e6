//! Round-robin discussion with a narrator and a summarizer.
//!
//! Discussion agents (everyone except the narrator and the summarizer) rotate as in
//! [`CircularStrategy`](super::CircularStrategy).  Every `narrator_interval` agent messages the
//! narrator adds a short scene description, and at the end of each rotation the summarizer
//! produces a structured round summary followed by a system marker.  A failed narrator or
//! summarizer call simply leaves its message out.

use std::sync::Arc;

use async_trait::async_trait;

use super::prompt::{transcript, truncate_chars, user_request, DiscussionPrompt};
use super::{new_session_id, Strategy};
use crate::chat_service::ChatService;
use crate::context::{ConversationContext, USER_MESSAGE_KEY};
use crate::message::{Message, MessageKind, USER_SENDER};

const RECENT_WINDOW: usize = 8;
const NARRATOR_WINDOW: usize = 6;
const SUMMARY_WINDOW: usize = 15;

/// Circular discussion interleaved with narration and per-round summaries.
pub struct CircularWithSummaryStrategy {
    chat: Arc<dyn ChatService>,
    session_id: String,
    narrator_agent: String,
    summarizer_agent: String,
    narrator_interval: u32,
    max_rounds: Option<u32>,
    include_system_messages: bool,
    current_agent_index: usize,
    round_count: u32,
    agent_messages_since_narrator: u32,
    pending_user_message: Option<String>,
}

impl CircularWithSummaryStrategy {
    pub fn new(
        chat: Arc<dyn ChatService>,
        narrator_agent: impl Into<String>,
        summarizer_agent: impl Into<String>,
    ) -> Self {
        Self {
            chat,
            session_id: new_session_id("circular-summary"),
            narrator_agent: narrator_agent.into(),
            summarizer_agent: summarizer_agent.into(),
            narrator_interval: 2,
            max_rounds: None,
            include_system_messages: true,
            current_agent_index: 0,
            round_count: 1,
            agent_messages_since_narrator: 0,
            pending_user_message: None,
        }
    }

    pub fn with_narrator_interval(mut self, interval: u32) -> Self {
        self.narrator_interval = interval.max(1);
        self
    }

    /// Bound the discussion; unbounded by default.
    pub fn with_max_rounds(mut self, max_rounds: Option<u32>) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_system_messages(mut self, enabled: bool) -> Self {
        self.include_system_messages = enabled;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn current_agent_index(&self) -> usize {
        self.current_agent_index
    }

    fn discussion_agents(&self, agents: &[String]) -> Vec<String> {
        agents
            .iter()
            .filter(|a| **a != self.narrator_agent && **a != self.summarizer_agent)
            .cloned()
            .collect()
    }

    fn reset_rotation(&mut self) {
        self.current_agent_index = 0;
        self.round_count = 1;
        self.agent_messages_since_narrator = 0;
    }

    async fn narrate(&self, recent: &[Message], ctx: &ConversationContext) -> Option<Message> {
        let context_text = recent
            .iter()
            .rev()
            .take(NARRATOR_WINDOW)
            .rev()
            .map(|m| format!("{}: {}", m.sender, truncate_chars(&m.content, 200)))
            .collect::<Vec<_>>()
            .join("\n");
        let last_response = recent
            .last()
            .map(|m| truncate_chars(&m.content, 300))
            .unwrap_or_default();
        let prompt = format!(
            "Based on the discussion, write a short narrative fragment (2-4 sentences). Describe \
             the scene, the atmosphere and what the characters do, in the third person.\n\n\
             Context:\n{}\n\nLast line:\n{}\n\nYour narrative fragment:",
            context_text, last_response
        );

        match self
            .chat
            .call(&self.narrator_agent, &self.session_id, &prompt, Some(ctx))
            .await
        {
            Ok(text) => Some(
                Message::narrator(self.narrator_agent.clone(), text.trim())
                    .with_round(self.round_count)
                    .with_metadata("round", self.round_count),
            ),
            Err(err) => {
                log::warn!("circular_summary: narration skipped: {}", err);
                None
            }
        }
    }

    async fn summarize(&self, recent: &[Message], ctx: &ConversationContext) -> Option<Message> {
        let discussion = transcript(recent.iter().filter(|m| {
            matches!(m.kind, MessageKind::Agent | MessageKind::Narrator)
        }));
        let prompt = format!(
            "Write a structured summary of this discussion round.\nUser request: {}\n\n\
             Discussion:\n{}\n\nFormat (keep it):\n\
             1. **Main ideas presented:**\n2. **Agreements or consensus:**\n\
             3. **Points of contention:**\n4. **Questions raised:**\n\
             5. **Suggestions for next round:**",
            user_request(ctx).unwrap_or(""),
            discussion
        );

        match self
            .chat
            .call(&self.summarizer_agent, &self.session_id, &prompt, Some(ctx))
            .await
        {
            Ok(text) => Some(
                Message::summarized(self.summarizer_agent.clone(), text.trim())
                    .with_round(self.round_count)
                    .with_metadata("round", self.round_count),
            ),
            Err(err) => {
                log::warn!("circular_summary: summary skipped: {}", err);
                None
            }
        }
    }
}

#[async_trait]
impl Strategy for CircularWithSummaryStrategy {
    fn name(&self) -> &str {
        "circular_with_summary"
    }

    async fn tick(
        &mut self,
        agents: &[String],
        ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>> {
        let discussion_agents = self.discussion_agents(agents);
        if discussion_agents.is_empty() {
            return None;
        }

        if let Some(text) = self.pending_user_message.take() {
            self.reset_rotation();
            let first = discussion_agents[0].clone();
            let reply = self
                .chat
                .call_or_fallback(&first, &self.session_id, &text, Some(&*ctx))
                .await;
            self.current_agent_index = 1 % discussion_agents.len();
            self.agent_messages_since_narrator = 1;
            return Some(vec![
                Message::user(USER_SENDER, text).with_metadata("type", "user_input"),
                Message::agent(first, reply)
                    .with_round(self.round_count)
                    .with_metadata("agent_index", 0)
                    .with_metadata("round", self.round_count)
                    .with_metadata("response_to_user", true),
            ]);
        }

        if self.should_stop() {
            return None;
        }

        let last = ctx.last_message()?.clone();
        if last.kind == MessageKind::User {
            self.reset_rotation();
        }
        if self.current_agent_index >= discussion_agents.len() {
            self.current_agent_index = 0;
        }

        let index = self.current_agent_index;
        let agent = discussion_agents[index].clone();
        let prompt = DiscussionPrompt::new(
            format!(
                "You are {} in a round-robin conversation. Current round: {}.",
                agent, self.round_count
            ),
            ctx,
        )
        .discussion(transcript(ctx.recent_messages(RECENT_WINDOW)))
        .last_message(&last)
        .instruction("Continue the discussion. Answer the last message.")
        .render();

        let reply = self
            .chat
            .call_or_fallback(&agent, &self.session_id, &prompt, Some(&*ctx))
            .await;
        let reply = Message::agent(agent, reply)
            .with_round(self.round_count)
            .with_metadata("agent_index", index)
            .with_metadata("round", self.round_count)
            .with_metadata("responding_to", last.sender.clone());
        self.agent_messages_since_narrator += 1;

        // the owner appends only after the tick, so prompts below see this tick's output too
        let mut recent: Vec<Message> = ctx.recent_messages(SUMMARY_WINDOW).to_vec();
        recent.push(reply.clone());
        let mut produced = vec![reply];

        if self.agent_messages_since_narrator >= self.narrator_interval {
            if let Some(narration) = self.narrate(&recent, ctx).await {
                recent.push(narration.clone());
                produced.push(narration);
            }
            self.agent_messages_since_narrator = 0;
        }

        self.current_agent_index = (index + 1) % discussion_agents.len();
        if self.current_agent_index == 0 {
            let completed = self.round_count;
            if let Some(summary) = self.summarize(&recent, ctx).await {
                produced.push(summary);
            }
            self.round_count += 1;
            if self.include_system_messages {
                produced.push(
                    Message::system(format!("=== Round {} completed ===", completed))
                        .with_round(completed)
                        .with_metadata("round_completed", completed),
                );
            }
        }

        Some(produced)
    }

    async fn handle_user_message(
        &mut self,
        text: &str,
        ctx: &mut ConversationContext,
    ) -> Vec<Message> {
        self.reset_rotation();
        self.pending_user_message = Some(text.to_string());
        ctx.update_memory(USER_MESSAGE_KEY, text);
        Vec::new()
    }

    fn should_stop(&self) -> bool {
        matches!(self.max_rounds, Some(max) if self.round_count > max)
    }
}
