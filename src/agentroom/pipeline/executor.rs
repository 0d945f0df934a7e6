//! Fixed-stage execution of one user request.
//!
//! [`PipelineExecutor::run`] walks every [`PipelineStage`] in order:
//!
//! 1. `RETRIEVE_MEMORY` asks the [`MemoryStore`] for context, degrading to an empty string;
//! 2. `PLAN` restates the request;
//! 3. `DISCUSS` drives the strategy for a bounded number of ticks, forwarding agent, narrator
//!    and summary messages to the sink as they are produced;
//! 4. `SYNTHESIZE` always runs and sends the final answer;
//! 5. `STORE_MEMORY` saves the request and the answer;
//! 6. `FACT_EXTRACTION` derives triples from the discussion;
//! 7. `UPDATE_GRAPH` applies the triples and analyses every agent message.
//!
//! A panic inside a stage is recorded in [`TaskState::error`].  A failed discussion still
//! continues to synthesis; any other failure skips straight to `DONE`.  The run itself never
//! fails.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentroom::chat_service::AgentChatService;
//! use agentroom::pipeline::PipelineExecutor;
//! use agentroom::strategy::CircularStrategy;
//!
//! #[tokio::main]
//! async fn main() {
//!     let chat = Arc::new(AgentChatService::new(Vec::new()));
//!     let mut executor = PipelineExecutor::new(
//!         7,
//!         vec!["Alice".into(), "Bob".into()],
//!         chat.clone(),
//!         Box::new(CircularStrategy::new(chat).with_max_rounds(1)),
//!     );
//!
//!     let state = executor.run("Plan a weekend trip", "user").await;
//!     println!("{:?}", state.synthesized_answer);
//! }
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::Mutex;

use super::fact_extractor::FactExtractor;
use super::stage::{PipelineStage, TaskState};
use super::synthesizer::SolutionSynthesizer;
use crate::chat_service::ChatService;
use crate::config::OrchestrationConfig;
use crate::context::{ConversationContext, MEMORY_CONTEXT_KEY, PLAN_KEY, USER_MESSAGE_KEY};
use crate::event::{forward_relationship_events, EventHandler, PipelineEvent};
use crate::memory::{MemoryStore, NoopMemory};
use crate::message::{Message, RoomId, SYSTEM_SENDER};
use crate::relationship::RelationshipManager;
use crate::sink::{deliver_logged, LoggingSink, MessageSink};
use crate::strategy::Strategy;

/// Consecutive empty ticks after which a discussion is considered over.
const MAX_EMPTY_TICKS: u32 = 2;

/// Unexpected failure inside a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The stage panicked.
    Panicked { stage: PipelineStage, message: String },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Panicked { stage, message } => {
                write!(f, "stage {} panicked: {}", stage, message)
            }
        }
    }
}

impl Error for PipelineError {}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs user requests through the fixed stage sequence for one room.
pub struct PipelineExecutor {
    room_id: RoomId,
    agents: Vec<String>,
    chat: Arc<dyn ChatService>,
    strategy: Box<dyn Strategy>,
    context: ConversationContext,
    memory: Arc<dyn MemoryStore>,
    sink: Arc<dyn MessageSink>,
    relationships: Arc<Mutex<RelationshipManager>>,
    event_handler: Option<Arc<dyn EventHandler>>,
    max_discuss_rounds: u32,
    discuss_tick_delay: Duration,
    llm_fact_extraction: bool,
}

impl PipelineExecutor {
    pub fn new(
        room_id: RoomId,
        agents: Vec<String>,
        chat: Arc<dyn ChatService>,
        strategy: Box<dyn Strategy>,
    ) -> Self {
        let defaults = OrchestrationConfig::default();
        Self {
            room_id,
            context: ConversationContext::new(agents.clone()),
            agents,
            chat,
            strategy,
            memory: Arc::new(NoopMemory),
            sink: Arc::new(LoggingSink),
            relationships: Arc::new(Mutex::new(RelationshipManager::new())),
            event_handler: None,
            max_discuss_rounds: defaults.max_discuss_rounds,
            discuss_tick_delay: defaults.discuss_tick_delay(),
            llm_fact_extraction: defaults.llm_fact_extraction,
        }
    }

    /// Take discussion bounds and fact extraction mode from `config`.
    pub fn with_config(mut self, config: &OrchestrationConfig) -> Self {
        self.max_discuss_rounds = config.max_discuss_rounds;
        self.discuss_tick_delay = config.discuss_tick_delay();
        self.llm_fact_extraction = config.llm_fact_extraction;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Share the room's relationship manager instead of a private one.
    pub fn with_relationships(mut self, relationships: Arc<Mutex<RelationshipManager>>) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Seed the strategy's context with earlier messages.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.context.extend_messages(history);
        self
    }

    pub fn with_max_discuss_rounds(mut self, rounds: u32) -> Self {
        self.max_discuss_rounds = rounds;
        self
    }

    pub fn with_discuss_tick_delay(mut self, delay: Duration) -> Self {
        self.discuss_tick_delay = delay;
        self
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn relationships(&self) -> Arc<Mutex<RelationshipManager>> {
        self.relationships.clone()
    }

    /// Conversation context accumulated by the discussions run so far.
    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    async fn emit(&self, event: PipelineEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_pipeline_event(&event).await;
        }
    }

    /// Handle one request from `sender`.  Always returns a state at [`PipelineStage::Done`].
    pub async fn run(&mut self, user_message: &str, sender: &str) -> TaskState {
        let mut state = TaskState::new(user_message, self.room_id, sender, self.agents.clone());
        log::info!(
            "PipelineExecutor room_id={} task={} RUN user_len={}",
            self.room_id,
            state.task_id,
            user_message.chars().count()
        );

        while let Some(stage) = state.advance() {
            if stage == PipelineStage::Done {
                break;
            }

            self.emit(PipelineEvent::StageStarted {
                room_id: self.room_id,
                task_id: state.task_id.clone(),
                stage,
            })
            .await;
            let started = Instant::now();
            let outcome = self.execute_stage(stage, &mut state).await;
            let elapsed = started.elapsed();
            log::debug!(
                "PipelineExecutor room_id={} stage={} done in {:?}",
                self.room_id,
                stage,
                elapsed
            );
            self.emit(PipelineEvent::StageCompleted {
                room_id: self.room_id,
                task_id: state.task_id.clone(),
                stage,
                elapsed_ms: elapsed.as_millis(),
            })
            .await;

            if let Err(err) = outcome {
                log::error!("PipelineExecutor room_id={} {}", self.room_id, err);
                state.record_error(err.to_string());
                if stage != PipelineStage::Discuss {
                    state.finish();
                    break;
                }
            }
        }

        log::info!(
            "PipelineExecutor room_id={} task={} DONE messages={} facts={} error={:?}",
            self.room_id,
            state.task_id,
            state.discussion_messages.len(),
            state.extracted_facts.len(),
            state.error
        );
        self.emit(PipelineEvent::PipelineCompleted {
            room_id: self.room_id,
            task_id: state.task_id.clone(),
            discussion_messages: state.discussion_messages.len(),
            facts: state.extracted_facts.len(),
            error: state.error.clone(),
        })
        .await;
        state
    }

    async fn execute_stage(
        &mut self,
        stage: PipelineStage,
        state: &mut TaskState,
    ) -> Result<(), PipelineError> {
        let work = async {
            match stage {
                PipelineStage::RetrieveMemory => self.retrieve_memory(state).await,
                PipelineStage::Plan => Self::plan(state),
                PipelineStage::Discuss => self.discuss(state).await,
                PipelineStage::Synthesize => self.synthesize(state).await,
                PipelineStage::StoreMemory => self.store_memory(state).await,
                PipelineStage::FactExtraction => self.extract_facts(state).await,
                PipelineStage::UpdateGraph => self.update_graph(state).await,
                PipelineStage::NewTask | PipelineStage::Done => {}
            }
        };
        AssertUnwindSafe(work)
            .catch_unwind()
            .await
            .map_err(|payload| PipelineError::Panicked {
                stage,
                message: panic_message(payload),
            })
    }

    async fn retrieve_memory(&self, state: &mut TaskState) {
        let context = match self.memory.retrieve(&state.user_message).await {
            Ok(found) => found.unwrap_or_default(),
            Err(err) => {
                log::warn!("memory retrieval for room {} failed: {}", self.room_id, err);
                String::new()
            }
        };
        state.memory_context = Some(context);
    }

    fn plan(state: &mut TaskState) {
        state.plan = Some(format!("User request: {}", state.user_message));
    }

    async fn forward(&self, message: &Message) {
        if message.kind.is_discussion_output() {
            deliver_logged(self.sink.as_ref(), message).await;
        }
    }

    fn record(&mut self, state: &mut TaskState, message: Message) {
        self.context.add_message(message.clone());
        state.discussion_messages.push(message);
    }

    async fn discuss(&mut self, state: &mut TaskState) {
        self.context
            .update_memory(USER_MESSAGE_KEY, state.user_message.clone());
        self.context.update_memory(
            MEMORY_CONTEXT_KEY,
            state.memory_context.clone().unwrap_or_default(),
        );
        self.context
            .update_memory(PLAN_KEY, state.plan.clone().unwrap_or_default());

        let opening = self.strategy.on_start(&mut self.context).await;
        let initial = self
            .strategy
            .handle_user_message(&state.user_message, &mut self.context)
            .await;
        for message in opening.into_iter().chain(initial) {
            self.forward(&message).await;
            self.record(state, message);
        }

        let mut rounds = 0;
        let mut empty_ticks = 0;
        while rounds < self.max_discuss_rounds {
            if self.strategy.should_stop() {
                log::debug!(
                    "PipelineExecutor room_id={} strategy {} finished after {} rounds",
                    self.room_id,
                    self.strategy.name(),
                    rounds
                );
                break;
            }

            let produced = self
                .strategy
                .tick(&self.agents, &mut self.context)
                .await
                .unwrap_or_default();
            rounds += 1;

            if produced.is_empty() {
                empty_ticks += 1;
                if empty_ticks >= MAX_EMPTY_TICKS {
                    break;
                }
            } else {
                empty_ticks = 0;
                for message in produced {
                    self.forward(&message).await;
                    self.record(state, message);
                }
            }

            if !self.discuss_tick_delay.is_zero() {
                tokio::time::sleep(self.discuss_tick_delay).await;
            }
        }

        self.strategy.on_stop(&mut self.context).await;
    }

    async fn synthesize(&self, state: &mut TaskState) {
        let agent = self
            .agents
            .last()
            .cloned()
            .unwrap_or_else(|| SYSTEM_SENDER.to_string());
        let answer = SolutionSynthesizer::new(self.chat.clone(), agent)
            .synthesize(state)
            .await;

        if !answer.is_empty() {
            let message = Message::summarized(SYSTEM_SENDER, answer.clone())
                .with_metadata("pipeline", "synthesize")
                .with_metadata("authority", "final_decision");
            deliver_logged(self.sink.as_ref(), &message).await;
        }
        state.synthesized_answer = Some(answer);
    }

    async fn store_memory(&self, state: &mut TaskState) {
        let text = format!(
            "User: {}\nAnswer: {}",
            state.user_message,
            state.synthesized_answer.as_deref().unwrap_or("(no answer)")
        );
        let mut metadata: HashMap<String, Value> = HashMap::new();
        metadata.insert("room_id".to_string(), Value::from(self.room_id));
        metadata.insert("pipeline".to_string(), Value::from("executor"));
        metadata.insert("task_id".to_string(), Value::from(state.task_id.clone()));

        match self.memory.store(&text, metadata).await {
            Ok(()) => state.memory_stored = true,
            Err(err) => log::warn!("memory store for room {} failed: {}", self.room_id, err),
        }
    }

    async fn extract_facts(&self, state: &mut TaskState) {
        let mut extractor = FactExtractor::new();
        if self.llm_fact_extraction {
            extractor = extractor.with_chat_service(self.chat.clone());
        }
        state.extracted_facts = extractor.extract(state).await;
    }

    async fn update_graph(&self, state: &mut TaskState) {
        let analyzer = {
            let mut manager = self.relationships.lock().await;
            manager.register_participants(&state.agent_names);
            let applied = manager.update_from_facts(&state.extracted_facts, &state.agent_names);
            log::debug!(
                "PipelineExecutor room_id={} applied {} of {} facts",
                self.room_id,
                applied,
                state.extracted_facts.len()
            );
            manager.analyzer()
        };

        // the manager lock is never held across an analyzer call
        for (i, message) in state.discussion_messages.iter().enumerate() {
            if !state.agent_names.contains(&message.sender) {
                continue;
            }
            let analysis = analyzer
                .analyze_message(
                    &message.content,
                    &message.sender,
                    &state.agent_names,
                    &state.discussion_messages[..i],
                )
                .await;
            if let Some(result) = analysis {
                self.relationships.lock().await.apply_analysis(
                    &result,
                    &message.sender,
                    &state.agent_names,
                );
            }
        }

        let events = self.relationships.lock().await.take_events();
        forward_relationship_events(self.event_handler.as_ref(), self.room_id, events).await;
        state.graph_updated = true;
    }
}
