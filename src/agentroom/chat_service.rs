//! The completion capability used by strategies and pipeline stages.
//!
//! Everything above this module talks to LLMs exclusively through [`ChatService::call`].  The
//! method returns a `Result`, callers decide whether a failure means "skip this turn" or "use
//! the fallback reply" via [`ChatService::call_or_fallback`].
//!
//! [`AgentChatService`] is the stock implementation: it resolves the agent by name and sends
//! the prompt together with the last few room messages.
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use agentroom::chat_service::{ChatService, ChatServiceError};
//! use agentroom::context::ConversationContext;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ChatService for Echo {
//!     async fn call(
//!         &self,
//!         agent: &str,
//!         _session_id: &str,
//!         prompt: &str,
//!         _context: Option<&ConversationContext>,
//!     ) -> Result<String, ChatServiceError> {
//!         Ok(format!("{} heard: {}", agent, prompt))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let service: Arc<dyn ChatService> = Arc::new(Echo);
//!     let reply = service.call_or_fallback("Alice", "s1", "hi", None).await;
//!     assert_eq!(reply, "Alice heard: hi");
//! }
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use async_trait::async_trait;

use crate::agent::Agent;
use crate::config::OrchestrationConfig;
use crate::context::ConversationContext;

/// Reply used when a completion fails and the caller needs *some* text.
pub const DEFAULT_FALLBACK_REPLY: &str = "I need a moment to gather my thoughts on this.";

/// Number of room messages [`AgentChatService`] prepends to each prompt by default.
pub const DEFAULT_CONTEXT_WINDOW: usize = 5;

/// Failure of a completion call.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatServiceError {
    /// No agent with this name is known to the service.
    AgentNotFound(String),

    /// The backend returned an error for this agent.
    Backend { agent: String, message: String },

    /// The backend answered with an empty reply.
    EmptyResponse(String),
}

impl fmt::Display for ChatServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatServiceError::AgentNotFound(name) => write!(f, "[{}] agent not found", name),
            ChatServiceError::Backend { agent, message } => {
                write!(f, "Backend error for agent {}: {}", agent, message)
            }
            ChatServiceError::EmptyResponse(agent) => {
                write!(f, "Agent {} returned an empty response", agent)
            }
        }
    }
}

impl Error for ChatServiceError {}

/// Chat-completion capability keyed by agent name.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Ask `agent` to answer `prompt` within `session_id`, optionally seeing the room context.
    async fn call(
        &self,
        agent: &str,
        session_id: &str,
        prompt: &str,
        context: Option<&ConversationContext>,
    ) -> Result<String, ChatServiceError>;

    /// Text substituted for a failed call by [`ChatService::call_or_fallback`].
    fn fallback_reply(&self) -> &str {
        DEFAULT_FALLBACK_REPLY
    }

    /// Like [`ChatService::call`] but never fails: errors are logged and replaced.
    ///
    /// Unknown agents yield `"[name] agent not found"`, every other failure yields
    /// [`ChatService::fallback_reply`].
    async fn call_or_fallback(
        &self,
        agent: &str,
        session_id: &str,
        prompt: &str,
        context: Option<&ConversationContext>,
    ) -> String {
        match self.call(agent, session_id, prompt, context).await {
            Ok(reply) => reply,
            Err(err @ ChatServiceError::AgentNotFound(_)) => {
                log::warn!("chat service: {}", err);
                err.to_string()
            }
            Err(err) => {
                log::warn!("chat service call failed, using fallback: {}", err);
                self.fallback_reply().to_string()
            }
        }
    }
}

/// [`ChatService`] backed by a set of [`Agent`]s.
pub struct AgentChatService {
    agents: HashMap<String, Agent>,
    context_window: usize,
    fallback: String,
}

impl AgentChatService {
    pub fn new<I>(agents: I) -> Self
    where
        I: IntoIterator<Item = Agent>,
    {
        Self {
            agents: agents
                .into_iter()
                .map(|agent| (agent.name.clone(), agent))
                .collect(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            fallback: DEFAULT_FALLBACK_REPLY.to_string(),
        }
    }

    /// Number of recent room messages sent along with every prompt.
    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn with_fallback_reply(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// Take the context window and fallback reply from `config`.
    pub fn with_config(self, config: &OrchestrationConfig) -> Self {
        self.with_context_window(config.context_window)
            .with_fallback_reply(config.fallback_reply.clone())
    }

    /// Names of the agents this service can reach, sorted.
    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    fn render_context(&self, context: Option<&ConversationContext>) -> Option<String> {
        let context = context?;
        let lines: Vec<String> = context
            .recent_messages(self.context_window)
            .iter()
            .map(|m| m.transcript_line())
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

#[async_trait]
impl ChatService for AgentChatService {
    async fn call(
        &self,
        agent: &str,
        session_id: &str,
        prompt: &str,
        context: Option<&ConversationContext>,
    ) -> Result<String, ChatServiceError> {
        let target = self
            .agents
            .get(agent)
            .ok_or_else(|| ChatServiceError::AgentNotFound(agent.to_string()))?;

        let rendered = self.render_context(context);
        log::debug!(
            "AgentChatService::call agent={} session={} prompt_len={}",
            agent,
            session_id,
            prompt.len()
        );

        let reply = target
            .respond(prompt, rendered.as_deref())
            .await
            .map_err(|err| ChatServiceError::Backend {
                agent: agent.to_string(),
                message: err.to_string(),
            })?;

        if reply.is_empty() {
            return Err(ChatServiceError::EmptyResponse(agent.to_string()));
        }
        Ok(reply)
    }

    fn fallback_reply(&self) -> &str {
        &self.fallback
    }
}
