//! # AgentRoom
//!
//! AgentRoom orchestrates conversations between several LLM-backed agents sharing one room.
//! It decides who speaks next, keeps the shared history, turns each user request into a final
//! answer and tracks how participants feel about each other, without stalling or looping
//! forever.
//!
//! The crate provides carefully layered abstractions for:
//!
//! * **Turn-taking strategies**: [`strategy::Strategy`] state machines for round-robin
//!   ([`strategy::CircularStrategy`]), narrator-led storytelling
//!   ([`strategy::NarratorStrategy`]), fixed-iteration broadcast
//!   ([`strategy::FullContextStrategy`]) and round-robin with narration and summaries
//!   ([`strategy::CircularWithSummaryStrategy`])
//! * **Background rooms**: [`OrchestrationClient`] runs a strategy on a tick schedule, takes
//!   user messages from a FIFO queue and dispatches every produced message to a
//!   [`sink::MessageSink`] in order
//! * **Request pipeline**: [`pipeline::PipelineExecutor`] walks a request through memory
//!   retrieval, planning, discussion, synthesis, memory storage, fact extraction and graph
//!   updates
//! * **Relationships**: [`relationship::RelationshipManager`] keeps a directed, clamped
//!   sentiment graph between participants
//! * **Lifecycle**: [`RoomRegistry`] guarantees at most one client or pipeline per room
//! * **Backends**: [`ChatService`] is the completion seam; [`chat_service::AgentChatService`]
//!   adapts [`Agent`]s built on any [`ClientWrapper`], such as the OpenAI-compatible client in
//!   [`clients::openai_compatible`]
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentroom::clients::openai_compatible::OpenAiCompatibleClient;
//! use agentroom::chat_service::AgentChatService;
//! use agentroom::registry::{OrchestrationType, RoomRegistry, RoomServices, RoomSpec};
//! use agentroom::Agent;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     agentroom::init_logger();
//!
//!     let client = Arc::new(OpenAiCompatibleClient::new(
//!         &std::env::var("OPEN_AI_SECRET")?,
//!         "gpt-4.1-mini",
//!         "https://api.openai.com",
//!     ));
//!     let agents = vec![
//!         Agent::new("Alice", client.clone()).with_expertise("Travel"),
//!         Agent::new("Bob", client.clone()).with_personality("Sceptical"),
//!         Agent::new("Carol", client).with_expertise("Budgets"),
//!     ];
//!
//!     let config = agentroom::OrchestrationConfig::from_env()?;
//!     let chat = Arc::new(AgentChatService::new(agents).with_config(&config));
//!     let registry = RoomRegistry::new(RoomServices::new(chat).with_config(config));
//!     let room = RoomSpec::new(
//!         1,
//!         OrchestrationType::Circular,
//!         vec!["Alice".into(), "Bob".into(), "Carol".into()],
//!     );
//!
//!     let handle = registry
//!         .run_pipeline(&room, "Plan a weekend in Lisbon", "user")
//!         .await?
//!         .expect("orchestrated room");
//!     if let Some(state) = handle.wait().await {
//!         println!("{}", state.synthesized_answer.unwrap_or_default());
//!     }
//!
//!     registry.stop_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Every tunable lives in [`OrchestrationConfig`], loadable from `AGENTROOM_*` environment
//! variables or from a JSON file.
//!
//! ## Logging
//!
//! The crate logs through the [`log`] facade.  Call [`init_logger`] for `RUST_LOG` driven
//! output through `env_logger`, or install any other logger.

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// ```rust
/// agentroom::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `agentroom` module.
pub mod agentroom;

// Re-exporting key items for easier external access.
pub use agentroom::agent;
pub use agentroom::agent::Agent;
pub use agentroom::chat_service;
pub use agentroom::chat_service::{AgentChatService, ChatService, ChatServiceError};
pub use agentroom::client_wrapper;
pub use agentroom::client_wrapper::{ClientWrapper, PromptMessage, Role};
pub use agentroom::clients;
pub use agentroom::config;
pub use agentroom::config::{ConfigError, OrchestrationConfig};
pub use agentroom::context;
pub use agentroom::context::ConversationContext;
pub use agentroom::event;
pub use agentroom::event::{EventHandler, OrchestrationEvent, PipelineEvent, RelationshipEvent};
pub use agentroom::memory;
pub use agentroom::memory::{InMemoryStore, MemoryStore, NoopMemory};
pub use agentroom::message;
pub use agentroom::message::{Message, MessageKind, RoomId};
pub use agentroom::orchestration_client;
pub use agentroom::orchestration_client::OrchestrationClient;
pub use agentroom::pipeline;
pub use agentroom::pipeline::{PipelineExecutor, PipelineStage, TaskState};
pub use agentroom::registry;
pub use agentroom::registry::{RoomRegistry, RoomServices, RoomSpec};
pub use agentroom::relationship;
pub use agentroom::relationship::RelationshipManager;
pub use agentroom::sink;
pub use agentroom::sink::MessageSink;
pub use agentroom::strategy;
pub use agentroom::strategy::Strategy;
