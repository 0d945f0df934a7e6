//! LLM-backed persona taking part in a room.
//!
//! An [`Agent`] couples a display name with persona hints and a [`ClientWrapper`].  Agents are
//! stateless between calls: room history is supplied by the caller on every
//! [`Agent::respond`], which lets one agent definition be shared by several rooms.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentroom::agent::Agent;
//! use agentroom::clients::openai_compatible::OpenAiCompatibleClient;
//!
//! let client = Arc::new(OpenAiCompatibleClient::new(
//!     "sk-...",
//!     "gpt-4.1-mini",
//!     "https://api.openai.com",
//! ));
//! let alice = Agent::new("Alice", client)
//!     .with_expertise("Travel planning")
//!     .with_personality("Cheerful, concise");
//! assert_eq!(alice.name, "Alice");
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::client_wrapper::{ClientResult, ClientWrapper, PromptMessage, Role, TokenUsage};

/// A named persona bound to a chat-completion backend.
#[derive(Clone)]
pub struct Agent {
    /// Display name, also the key used by strategies and the relationship graph.
    pub name: String,
    /// Free-form description of the agent's strengths embedded into the system prompt.
    pub expertise: Option<String>,
    /// Persona hints that diversify the tone of generated responses.
    pub personality: Option<String>,
    /// Arbitrary metadata associated with the agent.
    pub metadata: HashMap<String, String>,
    client: Arc<dyn ClientWrapper>,
}

impl Agent {
    pub fn new(name: impl Into<String>, client: Arc<dyn ClientWrapper>) -> Self {
        Self {
            name: name.into(),
            expertise: None,
            personality: None,
            metadata: HashMap::new(),
            client,
        }
    }

    /// Attach an expertise description used in the system prompt.
    pub fn with_expertise(mut self, expertise: impl Into<String>) -> Self {
        self.expertise = Some(expertise.into());
        self
    }

    /// Attach a personality descriptor used in the system prompt.
    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Model behind this agent.
    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// Token usage of the most recent [`respond`](Self::respond), if the backend reports it.
    pub fn last_usage(&self) -> Option<TokenUsage> {
        self.client.get_last_usage()
    }

    /// System prompt describing the persona.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You are {}, a participant in a group conversation. Stay in character and answer in a few sentences.",
            self.name
        );
        if let Some(expertise) = &self.expertise {
            prompt.push_str(&format!("\nExpertise: {}", expertise));
        }
        if let Some(personality) = &self.personality {
            prompt.push_str(&format!("\nPersonality: {}", personality));
        }
        prompt
    }

    /// Ask the agent to answer `prompt`, optionally preceded by room context.
    pub async fn respond(&self, prompt: &str, context: Option<&str>) -> ClientResult<String> {
        let mut messages = vec![PromptMessage::new(Role::System, self.system_prompt())];
        if let Some(context) = context.filter(|c| !c.is_empty()) {
            messages.push(PromptMessage::new(
                Role::User,
                format!("Conversation so far:\n{}", context),
            ));
        }
        messages.push(PromptMessage::new(Role::User, prompt));

        log::debug!(
            "Agent '{}' calling model {} with {} messages",
            self.name,
            self.client.model_name(),
            messages.len()
        );
        let reply = self.client.send_message(&messages).await?;
        if let Some(usage) = self.client.get_last_usage() {
            log::debug!(
                "Agent '{}' usage: input={} output={} total={}",
                self.name,
                usage.input_tokens,
                usage.output_tokens,
                usage.total_tokens
            );
        }
        Ok(reply.content.trim().to_string())
    }
}
