//! Shared state for a single conversation.
//!
//! A [`ConversationContext`] is owned by exactly one
//! [`OrchestrationClient`](crate::orchestration_client::OrchestrationClient) or
//! [`PipelineExecutor`](crate::pipeline::PipelineExecutor).  Strategies receive it by mutable
//! reference on every call, so there is never more than one writer.
//!
//! Two invariants hold for the whole lifetime of a context:
//!
//! * the participant list is fixed at construction and only exposed read-only;
//! * the history is append-only, existing entries are never edited or removed.
//!
//! ```rust
//! use agentroom::context::{ConversationContext, USER_MESSAGE_KEY};
//! use agentroom::message::Message;
//!
//! let mut ctx = ConversationContext::new(vec!["Alice".into(), "Bob".into()]);
//! ctx.add_message(Message::user("user", "Plan a trip"));
//! ctx.add_message(Message::agent("Alice", "Let's go to Rome"));
//! ctx.update_memory(USER_MESSAGE_KEY, "Plan a trip");
//!
//! assert_eq!(ctx.history().len(), 2);
//! assert_eq!(ctx.last_message().unwrap().sender, "Alice");
//! assert_eq!(ctx.memory_str(USER_MESSAGE_KEY), Some("Plan a trip"));
//! ```

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::message::{Message, MessageKind};

/// Shared-memory key holding the user request currently being discussed.
pub const USER_MESSAGE_KEY: &str = "_user_message";

/// Shared-memory key holding text retrieved from long-term memory.
pub const MEMORY_CONTEXT_KEY: &str = "_memory_context";

/// Shared-memory key holding the plan produced by the pipeline.
pub const PLAN_KEY: &str = "_plan";

/// Shared-memory key holding the running list of key points (a JSON array of strings).
pub const KEY_POINTS_KEY: &str = "key_points";

/// History, scratch memory and participants of one conversation.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    history: Vec<Message>,
    shared_memory: HashMap<String, Value>,
    current_topic: Option<String>,
    participants: Vec<String>,
}

/// Aggregate counters returned by [`ConversationContext::statistics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextStatistics {
    pub total_messages: usize,
    pub messages_by_kind: HashMap<String, usize>,
    pub messages_by_sender: HashMap<String, usize>,
    pub participants: usize,
    pub current_topic: Option<String>,
}

/// Serializable snapshot of a whole conversation produced by [`ConversationContext::export`].
#[derive(Debug, Clone, Serialize)]
pub struct ConversationExport {
    pub participants: Vec<String>,
    pub current_topic: Option<String>,
    pub messages: Vec<Message>,
    pub shared_memory: HashMap<String, Value>,
    pub statistics: ContextStatistics,
}

impl ConversationContext {
    /// Create an empty context for the given participants.
    pub fn new(participants: Vec<String>) -> Self {
        Self {
            participants,
            ..Default::default()
        }
    }

    /// Create a context whose history is pre-populated, e.g. from persisted messages.
    pub fn with_history(participants: Vec<String>, history: Vec<Message>) -> Self {
        Self {
            participants,
            history,
            ..Default::default()
        }
    }

    /// The fixed list of participants.
    pub fn participants(&self) -> &[String] {
        &self.participants
    }

    /// Full ordered history.
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Append a message to the history.
    pub fn add_message(&mut self, message: Message) {
        self.history.push(message);
    }

    /// Append several messages in order.
    pub fn extend_messages<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        self.history.extend(messages);
    }

    /// The last `n` messages, oldest first.
    pub fn recent_messages(&self, n: usize) -> &[Message] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn messages_by_kind(&self, kind: MessageKind) -> Vec<&Message> {
        self.history.iter().filter(|m| m.kind == kind).collect()
    }

    pub fn messages_by_sender(&self, sender: &str) -> Vec<&Message> {
        self.history.iter().filter(|m| m.sender == sender).collect()
    }

    pub fn messages_in_round(&self, round_number: u32) -> Vec<&Message> {
        self.history
            .iter()
            .filter(|m| m.round_number == round_number)
            .collect()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.last()
    }

    pub fn last_message_by_sender(&self, sender: &str) -> Option<&Message> {
        self.history.iter().rev().find(|m| m.sender == sender)
    }

    /// Store a value in shared memory, replacing any previous value.
    pub fn update_memory(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.shared_memory.insert(key.into(), value.into());
    }

    pub fn memory(&self, key: &str) -> Option<&Value> {
        self.shared_memory.get(key)
    }

    /// Shared-memory value as a string slice, if present and a JSON string.
    pub fn memory_str(&self, key: &str) -> Option<&str> {
        self.shared_memory.get(key).and_then(Value::as_str)
    }

    /// Remove a shared-memory entry, returning its previous value.
    pub fn clear_memory(&mut self, key: &str) -> Option<Value> {
        self.shared_memory.remove(key)
    }

    /// Key points accumulated under [`KEY_POINTS_KEY`].
    pub fn key_points(&self) -> Vec<String> {
        match self.shared_memory.get(KEY_POINTS_KEY) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Append one key point to [`KEY_POINTS_KEY`].
    pub fn push_key_point(&mut self, point: impl Into<String>) {
        let entry = self
            .shared_memory
            .entry(KEY_POINTS_KEY.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(Value::String(point.into())),
            other => *other = Value::Array(vec![Value::String(point.into())]),
        }
    }

    pub fn current_topic(&self) -> Option<&str> {
        self.current_topic.as_deref()
    }

    pub fn set_topic(&mut self, topic: impl Into<String>) {
        self.current_topic = Some(topic.into());
    }

    /// Count messages per kind and per sender.
    pub fn statistics(&self) -> ContextStatistics {
        let mut stats = ContextStatistics {
            total_messages: self.history.len(),
            participants: self.participants.len(),
            current_topic: self.current_topic.clone(),
            ..Default::default()
        };
        for message in &self.history {
            *stats
                .messages_by_kind
                .entry(message.kind.as_str().to_string())
                .or_insert(0) += 1;
            *stats
                .messages_by_sender
                .entry(message.sender.clone())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Snapshot the conversation for persistence or inspection.
    pub fn export(&self) -> ConversationExport {
        ConversationExport {
            participants: self.participants.clone(),
            current_topic: self.current_topic.clone(),
            messages: self.history.clone(),
            shared_memory: self.shared_memory.clone(),
            statistics: self.statistics(),
        }
    }
}
