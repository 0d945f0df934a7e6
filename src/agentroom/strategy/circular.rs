//! Round-robin discussion.
//!
//! Agents speak in a fixed order.  A user message interrupts the rotation: the next tick
//! forwards the raw request to the first agent and returns the echoed user message together
//! with that agent's reply, after which the rotation continues from the second agent.  Every
//! completed rotation increments the round counter, and the strategy refuses to tick once
//! `round_count > max_rounds`.
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use agentroom::chat_service::{ChatService, ChatServiceError};
//! use agentroom::context::ConversationContext;
//! use agentroom::strategy::{CircularStrategy, Strategy};
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl ChatService for Canned {
//!     async fn call(
//!         &self,
//!         agent: &str,
//!         _session_id: &str,
//!         _prompt: &str,
//!         _context: Option<&ConversationContext>,
//!     ) -> Result<String, ChatServiceError> {
//!         Ok(format!("{} agrees", agent))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let agents = vec!["A".to_string(), "B".to_string(), "C".to_string()];
//!     let mut ctx = ConversationContext::new(agents.clone());
//!     let mut strategy = CircularStrategy::new(Arc::new(Canned));
//!
//!     assert!(strategy.handle_user_message("Let's discuss X", &mut ctx).await.is_empty());
//!     let produced = strategy.tick(&agents, &mut ctx).await.unwrap();
//!     assert_eq!(produced.len(), 2);
//!     assert_eq!(strategy.current_agent_index(), 1);
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use super::prompt::{transcript, DiscussionPrompt};
use super::{new_session_id, Strategy};
use crate::chat_service::ChatService;
use crate::context::{ConversationContext, USER_MESSAGE_KEY};
use crate::message::{Message, MessageKind, USER_SENDER};

/// Default number of full rotations before the discussion stops.
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Number of recent messages quoted in each prompt.
const RECENT_WINDOW: usize = 3;

/// Round-robin turn taking with a hard round bound.
pub struct CircularStrategy {
    chat: Arc<dyn ChatService>,
    session_id: String,
    current_agent_index: usize,
    round_count: u32,
    max_rounds: u32,
    include_system_messages: bool,
    pending_user_message: Option<String>,
}

impl CircularStrategy {
    pub fn new(chat: Arc<dyn ChatService>) -> Self {
        Self {
            chat,
            session_id: new_session_id("circular"),
            current_agent_index: 0,
            round_count: 1,
            max_rounds: DEFAULT_MAX_ROUNDS,
            include_system_messages: true,
            pending_user_message: None,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_start_index(mut self, index: usize) -> Self {
        self.current_agent_index = index;
        self
    }

    /// Emit a system marker after every completed rotation (on by default).
    pub fn with_system_messages(mut self, enabled: bool) -> Self {
        self.include_system_messages = enabled;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn current_agent_index(&self) -> usize {
        self.current_agent_index
    }

    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    fn reset_rotation(&mut self) {
        self.current_agent_index = 0;
        self.round_count = 1;
    }

    async fn answer_user(
        &mut self,
        text: String,
        agents: &[String],
        ctx: &ConversationContext,
    ) -> Vec<Message> {
        self.reset_rotation();
        let first = &agents[0];
        let reply = self
            .chat
            .call_or_fallback(first, &self.session_id, &text, Some(ctx))
            .await;

        let round = self.round_count;
        self.current_agent_index = 1 % agents.len();
        if self.current_agent_index == 0 {
            self.round_count += 1;
            log::debug!("circular: round {} started", self.round_count);
        }
        vec![
            Message::user(USER_SENDER, text).with_metadata("type", "user_input"),
            Message::agent(first.clone(), reply)
                .with_round(round)
                .with_metadata("agent_index", 0)
                .with_metadata("round", round)
                .with_metadata("response_to_user", true),
        ]
    }
}

#[async_trait]
impl Strategy for CircularStrategy {
    fn name(&self) -> &str {
        "circular"
    }

    async fn tick(
        &mut self,
        agents: &[String],
        ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>> {
        if agents.is_empty() {
            return None;
        }

        if let Some(text) = self.pending_user_message.take() {
            return Some(self.answer_user(text, agents, ctx).await);
        }

        if self.should_stop() {
            return None;
        }

        let last = ctx.last_message()?.clone();
        if last.kind == MessageKind::User {
            self.reset_rotation();
        }
        if self.current_agent_index >= agents.len() {
            self.current_agent_index = 0;
        }

        let index = self.current_agent_index;
        let round = self.round_count;
        let agent = agents[index].clone();
        let prompt = DiscussionPrompt::new(
            format!(
                "You are {} in a round-robin conversation. Current round: {}.",
                agent, round
            ),
            ctx,
        )
        .discussion(transcript(ctx.recent_messages(RECENT_WINDOW)))
        .last_message(&last)
        .render();

        let reply = self
            .chat
            .call_or_fallback(&agent, &self.session_id, &prompt, Some(&*ctx))
            .await;

        let mut produced = vec![Message::agent(agent, reply)
            .with_round(round)
            .with_metadata("agent_index", index)
            .with_metadata("round", round)
            .with_metadata("responding_to", last.sender.clone())];

        self.current_agent_index = (index + 1) % agents.len();
        if self.current_agent_index == 0 {
            self.round_count += 1;
            log::debug!("circular: round {} started", self.round_count);
            if self.include_system_messages {
                produced.push(
                    Message::system("=== Discussion continues ===")
                        .with_round(self.round_count)
                        .with_metadata("cycle", self.round_count),
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
        self.round_count > self.max_rounds
    }
}
