//! Pluggable turn-taking policies.
//!
//! A [`Strategy`] decides who speaks next in a room.  It is driven from the outside: the owner
//! of the [`ConversationContext`] (an
//! [`OrchestrationClient`](crate::orchestration_client::OrchestrationClient) or a
//! [`PipelineExecutor`](crate::pipeline::PipelineExecutor)) calls [`Strategy::tick`] on a timer
//! and [`Strategy::handle_user_message`] whenever someone types, and appends every returned
//! message to the context history itself.  Strategies never append to the history, they only
//! read it and write scratch values to shared memory.
//!
//! | Strategy | Turn order | Terminates when |
//! |----------|------------|-----------------|
//! | [`CircularStrategy`] | round-robin | `round_count > max_rounds` |
//! | [`NarratorStrategy`] | narrator interleaved with characters | never (owner bounds it) |
//! | [`FullContextStrategy`] | rotating window per iteration | `iteration >= max_iterations` |
//! | [`CircularWithSummaryStrategy`] | round-robin plus narrator and summarizer | optional round bound |

use async_trait::async_trait;

use crate::context::ConversationContext;
use crate::message::Message;

pub mod circular;
pub mod circular_summary;
pub mod full_context;
pub mod narrator;
pub mod prompt;

pub use circular::CircularStrategy;
pub use circular_summary::CircularWithSummaryStrategy;
pub use full_context::FullContextStrategy;
pub use narrator::{CharacterSelection, NarratorStrategy};

/// A turn-taking state machine bound to one room.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Short identifier used in logs and events.
    fn name(&self) -> &str;

    /// Called once when the owner starts.  Returned messages are appended and dispatched.
    async fn on_start(&mut self, _ctx: &mut ConversationContext) -> Vec<Message> {
        Vec::new()
    }

    /// Called once when the owner stops.
    async fn on_stop(&mut self, _ctx: &mut ConversationContext) {}

    /// Advance the conversation by one step.  `None` means nothing happened this tick.
    async fn tick(
        &mut self,
        agents: &[String],
        ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>>;

    /// React to text typed by a user.
    async fn handle_user_message(
        &mut self,
        text: &str,
        ctx: &mut ConversationContext,
    ) -> Vec<Message>;

    /// Whether the strategy has reached its terminal state.
    fn should_stop(&self) -> bool {
        false
    }
}

/// Session identifier used when a strategy is not given one explicitly.
pub(crate) fn new_session_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}
