//! Prompt assembly shared by the strategies.
//!
//! Every discussion prompt follows the same layout: a header naming the speaker, the user
//! request in a prominent block, retrieved memory, the recent discussion and finally the
//! message being answered.  The request always comes before the discussion so that long
//! threads cannot push it out of the agent's attention.

use crate::context::{ConversationContext, MEMORY_CONTEXT_KEY, PLAN_KEY, USER_MESSAGE_KEY};
use crate::message::Message;

/// Current user request stored in shared memory, if any.
pub fn user_request(ctx: &ConversationContext) -> Option<&str> {
    ctx.memory_str(USER_MESSAGE_KEY).filter(|s| !s.trim().is_empty())
}

/// Memory text retrieved for the current request, if any.
pub fn memory_context(ctx: &ConversationContext) -> Option<&str> {
    ctx.memory_str(MEMORY_CONTEXT_KEY)
        .filter(|s| !s.trim().is_empty())
}

/// Plan text for the current request, if any.
pub fn plan(ctx: &ConversationContext) -> Option<&str> {
    ctx.memory_str(PLAN_KEY).filter(|s| !s.trim().is_empty())
}

/// First `max_chars` characters of `text`, with an ellipsis when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// `sender: content` lines for the given messages.
pub fn transcript<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = &'a Message>,
{
    messages
        .into_iter()
        .map(|m| m.transcript_line())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builder for the standard discussion prompt layout.
pub struct DiscussionPrompt<'a> {
    header: String,
    ctx: &'a ConversationContext,
    discussion: Option<String>,
    last: Option<&'a Message>,
    instruction: &'a str,
}

impl<'a> DiscussionPrompt<'a> {
    pub fn new(header: impl Into<String>, ctx: &'a ConversationContext) -> Self {
        Self {
            header: header.into(),
            ctx,
            discussion: None,
            last: None,
            instruction: "Continue the discussion of the user's request. Answer the last message without losing sight of the request.",
        }
    }

    pub fn discussion(mut self, discussion: String) -> Self {
        self.discussion = Some(discussion);
        self
    }

    pub fn last_message(mut self, last: &'a Message) -> Self {
        self.last = Some(last);
        self
    }

    pub fn instruction(mut self, instruction: &'a str) -> Self {
        self.instruction = instruction;
        self
    }

    pub fn render(self) -> String {
        let mut parts = vec![self.header];
        if let Some(topic) = self.ctx.current_topic() {
            parts.push(format!("Topic: {}", topic));
        }
        if let Some(request) = user_request(self.ctx) {
            parts.push(String::new());
            parts.push("=== USER REQUEST (MAIN FOCUS, DO NOT IGNORE) ===".to_string());
            parts.push(format!("\"{}\"", request));
            parts.push(String::new());
        }
        if let Some(memory) = memory_context(self.ctx) {
            parts.push("Relevant memories:".to_string());
            parts.push(memory.to_string());
            parts.push(String::new());
        }
        if let Some(discussion) = self.discussion.filter(|d| !d.is_empty()) {
            parts.push("Discussion so far:".to_string());
            parts.push(discussion);
            parts.push(String::new());
        }
        if let Some(last) = self.last {
            parts.push(format!("Last message from {}:", last.sender));
            parts.push(format!("\"{}\"", last.content));
            parts.push(String::new());
        }
        parts.push(self.instruction.to_string());
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_precedes_discussion() {
        let mut ctx = ConversationContext::new(vec!["A".into()]);
        ctx.update_memory(USER_MESSAGE_KEY, "pick a city");
        ctx.update_memory(MEMORY_CONTEXT_KEY, "user likes Rome");
        let last = Message::agent("B", "Paris is nice");

        let prompt = DiscussionPrompt::new("You are A.", &ctx)
            .discussion("B: Paris is nice".to_string())
            .last_message(&last)
            .render();

        let request_at = prompt.find("pick a city").unwrap();
        let memory_at = prompt.find("user likes Rome").unwrap();
        let discussion_at = prompt.find("Discussion so far").unwrap();
        assert!(request_at < memory_at);
        assert!(memory_at < discussion_at);
    }

    #[test]
    fn truncate_is_char_safe() {
        assert_eq!(truncate_chars("привет", 3), "при...");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
