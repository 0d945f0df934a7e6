//! Backend abstraction over a remote chat-completion service.
//!
//! A [`ClientWrapper`] turns a list of role-tagged [`PromptMessage`]s into one assistant reply.
//! It keeps no conversation state: [`Agent`](crate::agent::Agent) adds the persona and
//! [`AgentChatService`](crate::chat_service::AgentChatService) adds the room context.

use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;

/// Result alias for backend calls.  Backends may fail for any reason, so the error is boxed.
pub type ClientResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Represents the possible roles for a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    // steers the model, carries the agent persona
    System,
    // room context and the actual request
    User,
    // marks content previously generated by the model
    Assistant,
}

impl Role {
    /// Role name as expected by OpenAI compatible APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// A single message sent to an LLM.
#[derive(Clone, Debug)]
pub struct PromptMessage {
    /// The role associated with the message.
    pub role: Role,
    /// The actual content of the message.
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Trait defining the interface to interact with chat-completion backends.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Model identifier used for requests, mostly for logging.
    fn model_name(&self) -> &str;

    /// Send the prompt messages and return the assistant reply.
    async fn send_message(&self, messages: &[PromptMessage]) -> ClientResult<PromptMessage>;

    /// Usage of the *last* `send_message()` call.
    /// Default impl reads [`ClientWrapper::usage_slot`] so wrappers only need to expose a slot.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // Wrappers supporting usage tracking override this.
        None
    }
}
