//! Conversation message value type.
//!
//! A [`Message`] is what strategies and pipeline stages produce, what sinks deliver to
//! observers, and what a [`ConversationContext`](crate::context::ConversationContext) keeps in
//! its append-only history.  Messages are cheap to clone and serialize with serde so the
//! transport layer can forward them as JSON without an intermediate DTO.
//!
//! # Example
//!
//! ```rust
//! use agentroom::message::{Message, MessageKind};
//!
//! let reply = Message::agent("Alice", "I think we should start with the basics.")
//!     .with_round(2)
//!     .with_metadata("action", "respond");
//!
//! assert_eq!(reply.kind, MessageKind::Agent);
//! assert_eq!(reply.round_number, 2);
//! assert_eq!(reply.metadata["action"], "respond");
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a conversation room.
pub type RoomId = u64;

/// Sender name used for messages originating from the orchestration engine itself.
pub const SYSTEM_SENDER: &str = "System";

/// Sender name used when a user message is echoed back into a conversation.
pub const USER_SENDER: &str = "user";

/// The category of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Text typed by a human participant.
    User,
    /// A reply produced by one of the discussion agents.
    Agent,
    /// Engine-generated markers such as round boundaries.
    System,
    /// Scene setting produced by a designated narrator agent.
    Narrator,
    /// A change of topic or other context update.
    ContextUpdate,
    /// A compressed summary or a final decision.
    Summarized,
}

impl MessageKind {
    /// Lowercase wire name of the kind, identical to its serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Agent => "agent",
            MessageKind::System => "system",
            MessageKind::Narrator => "narrator",
            MessageKind::ContextUpdate => "context_update",
            MessageKind::Summarized => "summarized",
        }
    }

    /// Whether messages of this kind are discussion output that observers should see live.
    ///
    /// ```rust
    /// use agentroom::message::MessageKind;
    ///
    /// assert!(MessageKind::Narrator.is_discussion_output());
    /// assert!(!MessageKind::System.is_discussion_output());
    /// ```
    pub fn is_discussion_output(&self) -> bool {
        matches!(
            self,
            MessageKind::Agent | MessageKind::Narrator | MessageKind::Summarized
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message body.
    pub content: String,

    /// Category of the message.
    pub kind: MessageKind,

    /// Display name of whoever produced the message.
    pub sender: String,

    /// UTC time at which the message was created.
    pub timestamp: DateTime<Utc>,

    /// Free-form metadata.  Strategies use well-known keys such as `"action"`,
    /// `"agent_index"` or `"authority"`.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,

    /// Agent the message is addressed to, if any.
    #[serde(default)]
    pub target_agent: Option<String>,

    /// Discussion round in which the message was produced (0 when not applicable).
    #[serde(default)]
    pub round_number: u32,
}

impl Message {
    /// Create a message of the given kind stamped with the current time.
    pub fn new(kind: MessageKind, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind,
            sender: sender.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            target_agent: None,
            round_number: 0,
        }
    }

    /// A user message sent by `sender`.
    pub fn user(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageKind::User, sender, content)
    }

    /// A reply produced by agent `sender`.
    pub fn agent(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageKind::Agent, sender, content)
    }

    /// An engine marker attributed to [`SYSTEM_SENDER`].
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, SYSTEM_SENDER, content)
    }

    /// A narration produced by narrator agent `sender`.
    pub fn narrator(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageKind::Narrator, sender, content)
    }

    /// A summary produced by `sender`.
    pub fn summarized(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageKind::Summarized, sender, content)
    }

    /// Attach a metadata entry, returning the updated message.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the round number, returning the updated message.
    pub fn with_round(mut self, round_number: u32) -> Self {
        self.round_number = round_number;
        self
    }

    /// Address the message to a specific agent, returning the updated message.
    pub fn with_target(mut self, target_agent: impl Into<String>) -> Self {
        self.target_agent = Some(target_agent.into());
        self
    }

    /// Render the message as a single `sender: content` transcript line.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.sender, self.content)
    }
}
