//! Broadcast discussion in a fixed number of iterations.
//!
//! Each tick is one iteration: a rotating window of `agents_per_iteration` agents answers the
//! same iteration context (initial prompt, previous iteration replies, the last key points and
//! a step counter).  An optional summary agent compresses the iteration and its summary is
//! stored as a key point for the next ones.  The strategy stops after `max_iterations`.

use std::sync::Arc;

use async_trait::async_trait;

use super::prompt::{memory_context, transcript, truncate_chars, user_request};
use super::{new_session_id, Strategy};
use crate::chat_service::ChatService;
use crate::context::{ConversationContext, USER_MESSAGE_KEY};
use crate::message::{Message, USER_SENDER};

/// Key points quoted in each iteration context.
const KEY_POINT_WINDOW: usize = 5;

/// Characters of a summary kept as a key point.
const KEY_POINT_CHARS: usize = 200;

/// Fixed-iteration discussion with an optional summarizer.
pub struct FullContextStrategy {
    chat: Arc<dyn ChatService>,
    session_id: String,
    initial_prompt: String,
    summary_agent: Option<String>,
    max_iterations: u32,
    agents_per_iteration: usize,
    include_system_messages: bool,
    current_iteration: u32,
    previous_replies: Vec<Message>,
}

impl FullContextStrategy {
    /// Five iterations of two agents each, no summarizer.
    pub fn new(chat: Arc<dyn ChatService>, initial_prompt: impl Into<String>) -> Self {
        Self {
            chat,
            session_id: new_session_id("full-context"),
            initial_prompt: initial_prompt.into(),
            summary_agent: None,
            max_iterations: 5,
            agents_per_iteration: 2,
            include_system_messages: true,
            current_iteration: 0,
            previous_replies: Vec::new(),
        }
    }

    pub fn with_summary_agent(mut self, agent: impl Into<String>) -> Self {
        self.summary_agent = Some(agent.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_agents_per_iteration(mut self, agents_per_iteration: usize) -> Self {
        self.agents_per_iteration = agents_per_iteration.max(1);
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

    pub fn current_iteration(&self) -> u32 {
        self.current_iteration
    }

    /// Agents taking part in the current iteration.
    ///
    /// The window starts at `(iteration * agents_per_iteration) % len` and wraps around,
    /// never naming the same agent twice.
    pub fn iteration_agents(&self, agents: &[String]) -> Vec<String> {
        if agents.is_empty() {
            return Vec::new();
        }
        let start = (self.current_iteration as usize * self.agents_per_iteration) % agents.len();
        let mut selected: Vec<String> = Vec::with_capacity(self.agents_per_iteration);
        for offset in 0..self.agents_per_iteration {
            let agent = &agents[(start + offset) % agents.len()];
            if !selected.contains(agent) {
                selected.push(agent.clone());
            }
        }
        selected
    }

    fn iteration_context(&self, ctx: &ConversationContext) -> String {
        let mut parts = Vec::new();
        if let Some(request) = user_request(ctx) {
            parts.push(format!("User request: {}", request));
        }
        parts.push(format!("Initial prompt: {}", self.initial_prompt));
        if let Some(memory) = memory_context(ctx) {
            parts.push(format!("\nRelevant memories:\n{}", memory));
        }
        if self.current_iteration > 0 && !self.previous_replies.is_empty() {
            parts.push("\nPrevious discussion:".to_string());
            parts.push(transcript(&self.previous_replies));
        }

        let key_points = ctx.key_points();
        if !key_points.is_empty() {
            parts.push("\nKey points so far:".to_string());
            let skip = key_points.len().saturating_sub(KEY_POINT_WINDOW);
            for (i, point) in key_points.iter().skip(skip).enumerate() {
                parts.push(format!("{}. {}", i + 1, point));
            }
        }
        parts.push(format!(
            "\nCurrent step: {}/{}",
            self.current_iteration + 1,
            self.max_iterations
        ));
        parts.join("\n")
    }

    async fn summarize(&self, replies: &[Message], ctx: &ConversationContext) -> Option<Message> {
        let summary_agent = self.summary_agent.as_ref()?;
        let prompt = format!(
            "Summarize the key points from this discussion step:\n\n{}\n\nProvide:\n\
             1. Main ideas presented\n2. Agreements or consensus\n3. Points of contention\n\
             4. Questions raised\n5. Suggestions for next step\n\n\
             Keep the summary concise but comprehensive.",
            transcript(replies)
        );
        match self
            .chat
            .call(summary_agent, &self.session_id, &prompt, Some(ctx))
            .await
        {
            Ok(summary) => Some(
                Message::summarized(summary_agent.clone(), summary)
                    .with_metadata("iteration", self.current_iteration)
                    .with_metadata("type", "iteration_summary"),
            ),
            Err(err) => {
                log::warn!("full_context: summary skipped: {}", err);
                None
            }
        }
    }
}

#[async_trait]
impl Strategy for FullContextStrategy {
    fn name(&self) -> &str {
        "full_context"
    }

    async fn on_start(&mut self, ctx: &mut ConversationContext) -> Vec<Message> {
        ctx.set_topic(truncate_chars(&self.initial_prompt, 100));
        ctx.update_memory("initial_prompt", self.initial_prompt.clone());
        if self.include_system_messages {
            vec![Message::system(format!(
                "Starting full context discussion with prompt: {}",
                self.initial_prompt
            ))
            .with_metadata("iteration", 0)
            .with_metadata("action", "init")]
        } else {
            Vec::new()
        }
    }

    async fn tick(
        &mut self,
        agents: &[String],
        ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>> {
        let discussion_agents: Vec<String> = agents
            .iter()
            .filter(|a| Some(*a) != self.summary_agent.as_ref())
            .cloned()
            .collect();
        if discussion_agents.is_empty() || self.should_stop() {
            return None;
        }

        let iteration_context = self.iteration_context(ctx);
        let prompt = format!(
            "You are participating in a group discussion.\n\nContext:\n{}\n\n\
             Based on the current context and your expertise, provide your perspective. Be \
             concise but thorough and focus on adding value to the discussion.",
            iteration_context
        );

        let mut replies = Vec::new();
        for agent in self.iteration_agents(&discussion_agents) {
            let reply = self
                .chat
                .call_or_fallback(&agent, &self.session_id, &prompt, Some(&*ctx))
                .await;
            replies.push(
                Message::agent(agent, reply)
                    .with_round(self.current_iteration + 1)
                    .with_metadata("iteration", self.current_iteration)
                    .with_metadata("agent_type", "participant"),
            );
        }

        let mut produced = replies.clone();
        if replies.len() > 1 {
            if let Some(summary) = self.summarize(&replies, ctx).await {
                ctx.push_key_point(format!(
                    "Step {}: {}",
                    self.current_iteration,
                    truncate_chars(&summary.content, KEY_POINT_CHARS)
                ));
                produced.push(summary);
            }
        }

        if self.include_system_messages {
            produced.push(
                Message::system("=== Discussion continues ===")
                    .with_metadata("iteration_completed", self.current_iteration + 1),
            );
        }

        self.previous_replies = replies;
        self.current_iteration += 1;
        Some(produced)
    }

    async fn handle_user_message(
        &mut self,
        text: &str,
        ctx: &mut ConversationContext,
    ) -> Vec<Message> {
        ctx.update_memory(USER_MESSAGE_KEY, text);
        ctx.update_memory("user_input_iteration", self.current_iteration);
        if self.should_stop() {
            // a new request opens a fresh set of iterations
            self.current_iteration = 0;
            self.previous_replies.clear();
        }
        vec![Message::user(USER_SENDER, text).with_metadata("influence_context", true)]
    }

    fn should_stop(&self) -> bool {
        self.current_iteration >= self.max_iterations
    }
}
