use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentroom::chat_service::{ChatService, ChatServiceError};
use agentroom::context::ConversationContext;
use agentroom::event::{EventHandler, PipelineEvent, RelationshipEvent};
use agentroom::memory::InMemoryStore;
use agentroom::message::{Message, MessageKind, RoomId};
use agentroom::pipeline::{Fact, FactExtractor, PipelineExecutor, PipelineStage};
use agentroom::relationship::{AnalysisResult, RelationshipAnalyzer, RelationshipManager};
use agentroom::sink::{CallbackSink, MessageSink};
use agentroom::strategy::{CircularStrategy, Strategy};
use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

/// Answers from a per-agent script, `"<agent> speaks"` otherwise.
struct ScriptedChat {
    replies: HashMap<String, String>,
    failing: Vec<String>,
}

impl ScriptedChat {
    fn new(script: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: script
                .iter()
                .map(|(a, r)| (a.to_string(), r.to_string()))
                .collect(),
            failing: Vec::new(),
        })
    }

    fn failing(agent: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: HashMap::new(),
            failing: vec![agent.to_string()],
        })
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn call(
        &self,
        agent: &str,
        _session_id: &str,
        _prompt: &str,
        _context: Option<&ConversationContext>,
    ) -> Result<String, ChatServiceError> {
        if self.failing.iter().any(|a| a == agent) {
            return Err(ChatServiceError::EmptyResponse(agent.to_string()));
        }
        Ok(self
            .replies
            .get(agent)
            .cloned()
            .unwrap_or_else(|| format!("{} speaks", agent)))
    }
}

struct PanickingStrategy;

#[async_trait]
impl Strategy for PanickingStrategy {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn tick(
        &mut self,
        _agents: &[String],
        _ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>> {
        panic!("strategy blew up");
    }

    async fn handle_user_message(
        &mut self,
        _text: &str,
        _ctx: &mut ConversationContext,
    ) -> Vec<Message> {
        Vec::new()
    }
}

#[derive(Default)]
struct StageRecorder {
    started: Mutex<Vec<PipelineStage>>,
    completed_runs: Mutex<usize>,
}

#[async_trait]
impl EventHandler for StageRecorder {
    async fn on_pipeline_event(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage, .. } => {
                self.started.lock().unwrap().push(*stage)
            }
            PipelineEvent::PipelineCompleted { .. } => *self.completed_runs.lock().unwrap() += 1,
            PipelineEvent::StageCompleted { .. } => {}
        }
    }
}

#[derive(Default)]
struct RelationshipRecorder {
    events: Mutex<Vec<(RoomId, RelationshipEvent)>>,
}

#[async_trait]
impl EventHandler for RelationshipRecorder {
    async fn on_relationship_event(&self, room_id: RoomId, event: &RelationshipEvent) {
        self.events.lock().unwrap().push((room_id, event.clone()));
    }
}

/// Records whether the shared manager could be locked while a message was being analysed.
#[derive(Default)]
struct LockCheckingAnalyzer {
    manager: Mutex<Option<Arc<AsyncMutex<RelationshipManager>>>>,
    manager_free: Mutex<Vec<bool>>,
}

#[async_trait]
impl RelationshipAnalyzer for LockCheckingAnalyzer {
    fn name(&self) -> &str {
        "lock_checking"
    }

    async fn analyze_message(
        &self,
        _message: &str,
        _sender: &str,
        _participants: &[String],
        _context: &[Message],
    ) -> Option<AnalysisResult> {
        let manager = self.manager.lock().unwrap().clone();
        if let Some(manager) = manager {
            let free = manager.try_lock().is_ok();
            self.manager_free.lock().unwrap().push(free);
        }
        None
    }
}

fn agents() -> Vec<String> {
    vec!["A".to_string(), "B".to_string(), "C".to_string()]
}

fn executor(chat: Arc<ScriptedChat>, strategy: Box<dyn Strategy>) -> PipelineExecutor {
    PipelineExecutor::new(1, agents(), chat, strategy).with_discuss_tick_delay(Duration::ZERO)
}

fn collecting_sink() -> (Arc<dyn MessageSink>, Arc<Mutex<Vec<Message>>>) {
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let store = delivered.clone();
    let sink = CallbackSink::new(move |message: &Message| {
        store.lock().unwrap().push(message.clone());
        Ok(())
    });
    (Arc::new(sink), delivered)
}

#[tokio::test]
async fn test_run_walks_every_stage_and_answers() {
    let chat = ScriptedChat::new(&[]);
    let recorder = Arc::new(StageRecorder::default());
    let (sink, delivered) = collecting_sink();
    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);
    let mut executor = executor(chat, Box::new(strategy))
        .with_sink(sink)
        .with_event_handler(recorder.clone());

    let state = executor.run("Where should we eat?", "user").await;

    assert!(state.is_done());
    assert!(state.error.is_none());
    assert_eq!(state.memory_context.as_deref(), Some(""));
    assert_eq!(state.plan.as_deref(), Some("User request: Where should we eat?"));
    assert_eq!(state.synthesized_answer.as_deref(), Some("C speaks"));
    assert!(state.graph_updated);
    assert_eq!(state.discussion_messages.len(), 5);

    assert_eq!(
        *recorder.started.lock().unwrap(),
        vec![
            PipelineStage::RetrieveMemory,
            PipelineStage::Plan,
            PipelineStage::Discuss,
            PipelineStage::Synthesize,
            PipelineStage::StoreMemory,
            PipelineStage::FactExtraction,
            PipelineStage::UpdateGraph,
        ]
    );
    assert_eq!(*recorder.completed_runs.lock().unwrap(), 1);

    let delivered = delivered.lock().unwrap();
    let senders: Vec<&str> = delivered.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, vec!["A", "B", "C", "System"]);
    let last = delivered.last().unwrap();
    assert_eq!(last.kind, MessageKind::Summarized);
    assert_eq!(last.metadata["authority"], "final_decision");
    assert_eq!(last.content, "C speaks");
}

#[tokio::test]
async fn test_agreement_and_thanks_update_the_graph() {
    let chat = ScriptedChat::new(&[("A", "I agree with B"), ("B", "thanks")]);
    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);
    let mut executor = executor(chat, Box::new(strategy));

    let state = executor.run("Pick a venue", "user").await;

    assert!(state
        .extracted_facts
        .contains(&Fact::new("A", "agreed_with", "B").with_source("A")));
    assert!(state
        .extracted_facts
        .contains(&Fact::new("B", "thanked", "A").with_source("B")));

    let relationships = executor.relationships();
    let manager = relationships.lock().await;
    assert!(manager.relationship_value("A", "B") > 0.1);
    assert!(manager.relationship_value("B", "A") > 0.1);
}

#[tokio::test]
async fn test_answers_are_stored_and_recalled() {
    let chat = ScriptedChat::new(&[]);
    let memory = Arc::new(InMemoryStore::new());
    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);
    let mut executor = executor(chat, Box::new(strategy)).with_memory(memory.clone());

    let first = executor.run("Plan a weekend in Lisbon", "user").await;
    assert!(first.memory_stored);

    let entries = memory.entries().await;
    assert_eq!(entries.len(), 1);
    assert!(entries[0].text.starts_with("User: Plan a weekend in Lisbon"));
    assert_eq!(entries[0].metadata["pipeline"], "executor");
    assert_eq!(entries[0].metadata["task_id"], first.task_id.as_str());

    let second = executor.run("What about Lisbon museums?", "user").await;
    assert!(second
        .memory_context
        .as_deref()
        .unwrap_or_default()
        .contains("Lisbon"));
    assert_ne!(first.task_id, second.task_id);
}

#[tokio::test]
async fn test_strategy_panic_is_recorded_and_run_completes() {
    let chat = ScriptedChat::new(&[]);
    let mut executor = executor(chat, Box::new(PanickingStrategy));

    let state = executor.run("Anything", "user").await;

    assert!(state.is_done());
    let error = state.error.expect("panic recorded");
    assert!(error.contains("DISCUSS"));
    assert!(error.contains("strategy blew up"));
    assert_eq!(state.synthesized_answer.as_deref(), Some("Anything"));
    assert!(state.graph_updated);
}

#[tokio::test]
async fn test_failed_synthesis_falls_back_to_transcript() {
    let chat = ScriptedChat::failing("C");
    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);
    let mut executor = executor(chat, Box::new(strategy));

    let state = executor.run("Decide", "user").await;
    let answer = state.synthesized_answer.unwrap();
    assert!(answer.contains("A: A speaks"));
    assert!(answer.contains("B: B speaks"));
}

#[tokio::test]
async fn test_room_without_agents_echoes_request() {
    let chat = ScriptedChat::new(&[]);
    let strategy = CircularStrategy::new(chat.clone());
    let mut executor = PipelineExecutor::new(2, Vec::new(), chat, Box::new(strategy))
        .with_discuss_tick_delay(Duration::ZERO);

    let state = executor.run("Is anyone here?", "user").await;
    assert!(state.is_done());
    assert!(state.discussion_messages.is_empty());
    assert_eq!(state.synthesized_answer.as_deref(), Some("Is anyone here?"));
}

#[tokio::test]
async fn test_discussion_is_bounded_by_round_limit() {
    let chat = ScriptedChat::new(&[]);
    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(100);
    let mut executor = executor(chat, Box::new(strategy)).with_max_discuss_rounds(4);

    let state = executor.run("Talk forever", "user").await;
    let agent_messages = state
        .discussion_messages
        .iter()
        .filter(|m| m.kind == MessageKind::Agent)
        .count();
    assert_eq!(agent_messages, 4);
}

#[tokio::test]
async fn test_heuristic_extraction_without_chat_service() {
    let chat = ScriptedChat::new(&[]);
    let mut state = agentroom::pipeline::TaskState::new("q", 1, "user", agents());
    state.discussion_messages = vec![
        Message::agent("A", "I disagree with C"),
        Message::agent("C", "Fair enough"),
    ];

    let facts = FactExtractor::new().extract(&state).await;
    assert!(facts.contains(&Fact::new("A", "disagreed_with", "C").with_source("A")));

    // no triples in the reply, so the heuristic answers
    let facts = FactExtractor::new().with_chat_service(chat).extract(&state).await;
    assert!(facts.contains(&Fact::new("A", "disagreed_with", "C").with_source("A")));
}

#[tokio::test]
async fn test_graph_update_reports_relationship_events() {
    let chat = ScriptedChat::new(&[("A", "I agree with B")]);
    let recorder = Arc::new(RelationshipRecorder::default());
    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);
    let mut executor = executor(chat, Box::new(strategy)).with_event_handler(recorder.clone());

    executor.run("Pick a venue", "user").await;

    let events = recorder.events.lock().unwrap();
    assert!(events.iter().all(|(room, _)| *room == 1));
    let added = events
        .iter()
        .filter(|(_, e)| matches!(e, RelationshipEvent::ParticipantAdded { .. }))
        .count();
    assert_eq!(added, 3);
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        RelationshipEvent::RelationshipUpdated { from, to, .. } if from == "A" && to == "B"
    )));
    assert!(executor.relationships().lock().await.take_events().is_empty());
}

#[tokio::test]
async fn test_manager_is_not_locked_while_messages_are_analysed() {
    let chat = ScriptedChat::new(&[]);
    let analyzer = Arc::new(LockCheckingAnalyzer::default());
    let manager = Arc::new(AsyncMutex::new(
        RelationshipManager::new().with_analyzer(analyzer.clone()),
    ));
    *analyzer.manager.lock().unwrap() = Some(manager.clone());

    let strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);
    let mut executor = executor(chat, Box::new(strategy)).with_relationships(manager);
    executor.run("Anything", "user").await;

    let free = analyzer.manager_free.lock().unwrap();
    assert_eq!(free.len(), 3);
    assert!(free.iter().all(|f| *f));
}
