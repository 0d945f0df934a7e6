//! Final decision step of a pipeline run.
//!
//! Unlike a round summarizer, the synthesizer is asked to decide whether the task is solved and
//! to answer the user directly.  It always produces an answer: the user message when nothing
//! was discussed, the raw transcript when the backend fails.

use std::sync::Arc;

use super::stage::TaskState;
use crate::chat_service::ChatService;

const SESSION_ID: &str = "synthesizer_session";

/// Turns a finished discussion into the answer sent back to the user.
pub struct SolutionSynthesizer {
    chat: Arc<dyn ChatService>,
    agent_name: String,
}

impl SolutionSynthesizer {
    pub fn new(chat: Arc<dyn ChatService>, agent_name: impl Into<String>) -> Self {
        Self {
            chat,
            agent_name: agent_name.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    fn prompt(state: &TaskState, discussion: &str) -> String {
        format!(
            "You are the FINAL DECISION MAKER.\n\nUSER REQUEST:\n{}\n\nPLAN:\n{}\n\n\
             AGENT DISCUSSION:\n{}\n\nYour task:\n1. Decide if the task is solved\n\
             2. Produce the final answer to the user\n3. Stop the discussion\n\n\
             This is the FINAL message.",
            state.user_message,
            state.plan.as_deref().unwrap_or("(no plan)"),
            discussion
        )
    }

    pub async fn synthesize(&self, state: &TaskState) -> String {
        let discussion = state.transcript();
        if discussion.trim().is_empty() {
            return state.user_message.clone();
        }

        let prompt = Self::prompt(state, &discussion);
        match self
            .chat
            .call(&self.agent_name, SESSION_ID, &prompt, None)
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => answer.trim().to_string(),
            Ok(_) => discussion,
            Err(err) => {
                log::warn!("synthesis by {} failed: {}", self.agent_name, err);
                discussion
            }
        }
    }
}
