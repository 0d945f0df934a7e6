//! Process-wide bookkeeping of running rooms.
//!
//! A [`RoomRegistry`] owns, per room, either one background [`OrchestrationClient`] or one
//! in-flight pipeline run, never both and never two of the same kind.  Every room has its own
//! slot guarded by an async lock; the map of slots is only locked long enough to look a slot
//! up, so a busy room never holds up another one.  Creation, replacement and removal of a
//! room's entry happen under its slot lock, and stopping a room keeps that lock until the
//! room's task has finished.  A caller asking for the room meanwhile waits and then sees an
//! empty slot, so a stopped room produces no further messages and never overlaps its
//! successor.
//!
//! Shared collaborators (chat backend, memory, sinks, configuration) are passed in once through
//! [`RoomServices`] instead of being looked up globally.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentroom::chat_service::AgentChatService;
//! use agentroom::registry::{OrchestrationType, RoomRegistry, RoomServices, RoomSpec};
//!
//! #[tokio::main]
//! async fn main() {
//!     let chat = Arc::new(AgentChatService::new(Vec::new()));
//!     let registry = RoomRegistry::new(RoomServices::new(chat));
//!
//!     let room = RoomSpec::new(1, OrchestrationType::Circular, vec!["A".into(), "B".into()]);
//!     let client = registry.get_or_start(&room).await.unwrap().unwrap();
//!     client.send_user_message("hello").unwrap();
//!
//!     registry.stop_all().await;
//! }
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::chat_service::ChatService;
use crate::config::OrchestrationConfig;
use crate::event::{forward_relationship_events, EventHandler};
use crate::memory::{MemoryStore, NoopMemory};
use crate::message::{Message, RoomId};
use crate::orchestration_client::OrchestrationClient;
use crate::pipeline::{PipelineExecutor, TaskState};
use crate::relationship::{RelationshipManager, RelationshipState};
use crate::sink::{LoggingSink, MessageSink};
use crate::strategy::{
    CircularStrategy, CircularWithSummaryStrategy, FullContextStrategy, NarratorStrategy,
    Strategy,
};

/// How long [`RoomRegistry::stop_room`] waits for a client to wind down before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_STORY_TOPIC: &str = "A story";
const DEFAULT_DISCUSSION_PROMPT: &str = "Discussion";

/// Turn-taking mode of a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationType {
    /// One agent answers directly; no orchestration.
    #[default]
    Single,
    Circular,
    Narrator,
    FullContext,
    CircularWithSummary,
}

impl fmt::Display for OrchestrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OrchestrationType::Single => "single",
            OrchestrationType::Circular => "circular",
            OrchestrationType::Narrator => "narrator",
            OrchestrationType::FullContext => "full_context",
            OrchestrationType::CircularWithSummary => "circular_with_summary",
        };
        f.write_str(name)
    }
}

impl FromStr for OrchestrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "single" => Ok(OrchestrationType::Single),
            "circular" => Ok(OrchestrationType::Circular),
            "narrator" => Ok(OrchestrationType::Narrator),
            "full_context" => Ok(OrchestrationType::FullContext),
            "circular_with_summary" => Ok(OrchestrationType::CircularWithSummary),
            other => Err(format!("unknown orchestration type: {}", other)),
        }
    }
}

/// What the registry needs to know about a room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomSpec {
    pub id: RoomId,
    pub orchestration: OrchestrationType,
    pub agents: Vec<String>,
    /// Story topic or initial prompt, depending on the orchestration.
    pub description: Option<String>,
    /// Earlier messages loaded into the context before the room starts.
    pub history: Vec<Message>,
}

impl RoomSpec {
    pub fn new(id: RoomId, orchestration: OrchestrationType, agents: Vec<String>) -> Self {
        Self {
            id,
            orchestration,
            agents,
            description: None,
            history: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }
}

/// Failures of the registry API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An orchestrated room has no agents.
    NoAgents(RoomId),

    /// A background client is live, so no pipeline may start.
    ClientRunning(RoomId),

    /// A pipeline run is in flight, so no client may start.
    PipelineRunning(RoomId),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NoAgents(id) => write!(f, "Room {} has no agents", id),
            RegistryError::ClientRunning(id) => {
                write!(f, "Room {} already runs a background client", id)
            }
            RegistryError::PipelineRunning(id) => {
                write!(f, "Room {} already runs a pipeline", id)
            }
        }
    }
}

impl Error for RegistryError {}

pub type MemoryFactory = Arc<dyn Fn(RoomId) -> Arc<dyn MemoryStore> + Send + Sync>;
pub type SinkFactory = Arc<dyn Fn(RoomId) -> Arc<dyn MessageSink> + Send + Sync>;

/// Collaborators shared by every room of a registry.
#[derive(Clone)]
pub struct RoomServices {
    chat: Arc<dyn ChatService>,
    config: OrchestrationConfig,
    memory_factory: MemoryFactory,
    sink_factory: SinkFactory,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl RoomServices {
    /// Default configuration, no memory, log-only sinks.
    pub fn new(chat: Arc<dyn ChatService>) -> Self {
        Self {
            chat,
            config: OrchestrationConfig::default(),
            memory_factory: Arc::new(|_| Arc::new(NoopMemory) as Arc<dyn MemoryStore>),
            sink_factory: Arc::new(|_| Arc::new(LoggingSink) as Arc<dyn MessageSink>),
            event_handler: None,
        }
    }

    pub fn with_config(mut self, config: OrchestrationConfig) -> Self {
        self.config = config;
        self
    }

    /// Memory store for a room, created once per room on first use.
    pub fn with_memory_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(RoomId) -> Arc<dyn MemoryStore> + Send + Sync + 'static,
    {
        self.memory_factory = Arc::new(factory);
        self
    }

    /// Sink for a room, created every time a client or pipeline starts.
    pub fn with_sink_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(RoomId) -> Arc<dyn MessageSink> + Send + Sync + 'static,
    {
        self.sink_factory = Arc::new(factory);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn chat(&self) -> Arc<dyn ChatService> {
        self.chat.clone()
    }

    pub fn config(&self) -> &OrchestrationConfig {
        &self.config
    }
}

/// Strategy for `kind`, configured from `config`.  `None` for single-agent rooms and rooms
/// without agents.
///
/// * circular: plain rotation bounded by `circular_max_rounds`;
/// * narrator: the first agent narrates the room description;
/// * full context: the last agent summarizes each iteration;
/// * circular with summary: the second-to-last agent narrates, the last one summarizes.
///   Rooms with fewer than three agents fall back to a plain circular rotation.
pub fn build_strategy(
    kind: OrchestrationType,
    agents: &[String],
    description: Option<&str>,
    chat: Arc<dyn ChatService>,
    config: &OrchestrationConfig,
) -> Option<Box<dyn Strategy>> {
    if agents.is_empty() {
        return None;
    }
    let description = description.map(str::trim).filter(|d| !d.is_empty());

    let circular = |chat: Arc<dyn ChatService>| -> Box<dyn Strategy> {
        Box::new(CircularStrategy::new(chat).with_max_rounds(config.circular_max_rounds))
    };

    match kind {
        OrchestrationType::Single => None,
        OrchestrationType::Circular => Some(circular(chat)),
        OrchestrationType::Narrator => Some(Box::new(
            NarratorStrategy::new(
                chat,
                agents[0].clone(),
                description.unwrap_or(DEFAULT_STORY_TOPIC),
            )
            .with_narrator_interval(config.narrator_interval)
            .with_max_agent_responses(config.narrator_max_agent_responses)
            .with_selection(config.character_selection),
        )),
        OrchestrationType::FullContext => {
            let mut strategy =
                FullContextStrategy::new(chat, description.unwrap_or(DEFAULT_DISCUSSION_PROMPT))
                    .with_max_iterations(config.full_context_max_iterations)
                    .with_agents_per_iteration(config.full_context_agents_per_iteration);
            if agents.len() > 1 {
                strategy = strategy.with_summary_agent(agents[agents.len() - 1].clone());
            }
            Some(Box::new(strategy))
        }
        OrchestrationType::CircularWithSummary => {
            if agents.len() < 3 {
                log::warn!(
                    "circular_with_summary needs at least three agents, got {}; using circular",
                    agents.len()
                );
                return Some(circular(chat));
            }
            Some(Box::new(
                CircularWithSummaryStrategy::new(
                    chat,
                    agents[agents.len() - 2].clone(),
                    agents[agents.len() - 1].clone(),
                )
                .with_narrator_interval(config.summary_narrator_interval)
                .with_max_rounds(config.summary_max_rounds),
            ))
        }
    }
}

/// Receives the final state of a background pipeline run.
pub struct PipelineHandle {
    room_id: RoomId,
    rx: oneshot::Receiver<TaskState>,
}

impl PipelineHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Wait for the run.  `None` if it was cancelled by `stop_room`, `stop_all` or a newer run.
    pub async fn wait(self) -> Option<TaskState> {
        self.rx.await.ok()
    }
}

enum RoomEntry {
    Client {
        client: Arc<OrchestrationClient>,
        task: JoinHandle<()>,
    },
    Pipeline {
        run_id: u64,
        task: JoinHandle<()>,
    },
}

impl RoomEntry {
    fn is_finished(&self) -> bool {
        match self {
            RoomEntry::Client { task, .. } | RoomEntry::Pipeline { task, .. } => {
                task.is_finished()
            }
        }
    }
}

/// A room's current entry.  Slots are never removed from the map, only emptied.
type RoomSlot = Arc<Mutex<Option<RoomEntry>>>;

/// State that outlives individual clients and pipeline runs.
#[derive(Clone)]
struct RoomResources {
    memory: Arc<dyn MemoryStore>,
    relationships: Arc<Mutex<RelationshipManager>>,
}

/// Registry of running rooms.
pub struct RoomRegistry {
    services: RoomServices,
    rooms: Mutex<HashMap<RoomId, RoomSlot>>,
    resources: Mutex<HashMap<RoomId, RoomResources>>,
    next_run_id: AtomicU64,
}

impl RoomRegistry {
    pub fn new(services: RoomServices) -> Self {
        Self {
            services,
            rooms: Mutex::new(HashMap::new()),
            resources: Mutex::new(HashMap::new()),
            next_run_id: AtomicU64::new(1),
        }
    }

    pub fn services(&self) -> &RoomServices {
        &self.services
    }

    async fn resources(&self, room: &RoomSpec) -> RoomResources {
        let resources = self
            .resources
            .lock()
            .await
            .entry(room.id)
            .or_insert_with(|| {
                let config = &self.services.config;
                let analyzer = config.relationship_analyzer.build(
                    Some(self.services.chat.clone()),
                    room.agents.first().map(String::as_str),
                );
                let manager = RelationshipManager::new()
                    .with_analyzer(analyzer)
                    .with_decay_rate(config.relationship_decay_rate)
                    .with_history_cap(config.relationship_history_cap);
                RoomResources {
                    memory: (self.services.memory_factory)(room.id),
                    relationships: Arc::new(Mutex::new(manager)),
                }
            })
            .clone();

        let events = {
            let mut manager = resources.relationships.lock().await;
            manager.register_participants(&room.agents);
            manager.take_events()
        };
        forward_relationship_events(self.services.event_handler.as_ref(), room.id, events).await;
        resources
    }

    async fn slot(&self, room_id: RoomId) -> RoomSlot {
        self.rooms
            .lock()
            .await
            .entry(room_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    async fn existing_slot(&self, room_id: RoomId) -> Option<RoomSlot> {
        self.rooms.lock().await.get(&room_id).cloned()
    }

    async fn all_slots(&self) -> Vec<(RoomId, RoomSlot)> {
        self.rooms
            .lock()
            .await
            .iter()
            .map(|(id, slot)| (*id, slot.clone()))
            .collect()
    }

    /// Relationship manager of a room, created on first use.
    pub async fn relationships(&self, room: &RoomSpec) -> Arc<Mutex<RelationshipManager>> {
        self.resources(room).await.relationships
    }

    /// Serializable relationship state of a room that has been used before.
    pub async fn relationship_state(&self, room_id: RoomId) -> Option<RelationshipState> {
        let relationships = self
            .resources
            .lock()
            .await
            .get(&room_id)
            .map(|r| r.relationships.clone())?;
        let state = relationships.lock().await.full_state();
        Some(state)
    }

    /// The live client of `room`, starting one if needed.
    ///
    /// Returns `Ok(None)` for single-agent rooms.  Concurrent callers for the same room all
    /// receive the same client.  A client whose loops have ended on their own is replaced.
    pub async fn get_or_start(
        &self,
        room: &RoomSpec,
    ) -> Result<Option<Arc<OrchestrationClient>>, RegistryError> {
        if room.orchestration == OrchestrationType::Single {
            log::debug!("registry get_or_start room_id={} skip (single)", room.id);
            return Ok(None);
        }
        if room.agents.is_empty() {
            return Err(RegistryError::NoAgents(room.id));
        }

        self.resources(room).await;
        let slot = self.slot(room.id).await;
        let mut entry = slot.lock().await;
        match entry.as_ref() {
            Some(RoomEntry::Client { client, task }) if !task.is_finished() => {
                log::debug!("registry get_or_start room_id={} already running", room.id);
                return Ok(Some(client.clone()));
            }
            Some(RoomEntry::Pipeline { task, .. }) if !task.is_finished() => {
                return Err(RegistryError::PipelineRunning(room.id));
            }
            _ => {}
        }

        let config = &self.services.config;
        let strategy = match build_strategy(
            room.orchestration,
            &room.agents,
            room.description.as_deref(),
            self.services.chat.clone(),
            config,
        ) {
            Some(strategy) => strategy,
            None => return Ok(None),
        };

        let mut client = OrchestrationClient::new(room.id, room.agents.clone())
            .with_tick_interval(config.tick_interval())
            .with_strategy(strategy)
            .with_sink((self.services.sink_factory)(room.id))
            .with_history(room.history.clone());
        if let Some(handler) = &self.services.event_handler {
            client = client.with_event_handler(handler.clone());
        }
        let client = Arc::new(client);

        let runner = client.clone();
        let max_ticks = config.max_ticks;
        let task = tokio::spawn(async move {
            if let Err(err) = runner.start(max_ticks).await {
                log::error!("room {} client failed to start: {}", runner.room_id(), err);
            }
        });
        *entry = Some(RoomEntry::Client {
            client: client.clone(),
            task,
        });
        log::info!(
            "registry room_id={} started {} agents={:?}",
            room.id,
            room.orchestration,
            room.agents
        );
        Ok(Some(client))
    }

    /// The live client of a room, without creating one.
    pub async fn get(&self, room_id: RoomId) -> Option<Arc<OrchestrationClient>> {
        let slot = self.existing_slot(room_id).await?;
        let entry = slot.lock().await;
        match entry.as_ref() {
            Some(RoomEntry::Client { client, task }) if !task.is_finished() => Some(client.clone()),
            _ => None,
        }
    }

    /// Whether a pipeline run is in flight for the room.
    pub async fn is_pipeline_running(&self, room_id: RoomId) -> bool {
        let slot = match self.existing_slot(room_id).await {
            Some(slot) => slot,
            None => return false,
        };
        let entry = slot.lock().await;
        matches!(
            entry.as_ref(),
            Some(RoomEntry::Pipeline { task, .. }) if !task.is_finished()
        )
    }

    /// Run `text` through the pipeline of `room` in the background.
    ///
    /// A pipeline still running for the room is cancelled first.  Returns `Ok(None)` for
    /// single-agent rooms and an error while a background client owns the room.
    pub async fn run_pipeline(
        &self,
        room: &RoomSpec,
        text: &str,
        sender: &str,
    ) -> Result<Option<PipelineHandle>, RegistryError> {
        if room.orchestration == OrchestrationType::Single {
            log::debug!("registry run_pipeline room_id={} skip (single)", room.id);
            return Ok(None);
        }
        if room.agents.is_empty() {
            return Err(RegistryError::NoAgents(room.id));
        }

        let resources = self.resources(room).await;
        let config = &self.services.config;
        let strategy = match build_strategy(
            room.orchestration,
            &room.agents,
            room.description.as_deref(),
            self.services.chat.clone(),
            config,
        ) {
            Some(strategy) => strategy,
            None => return Ok(None),
        };

        let mut executor = PipelineExecutor::new(
            room.id,
            room.agents.clone(),
            self.services.chat.clone(),
            strategy,
        )
        .with_config(config)
        .with_memory(resources.memory)
        .with_sink((self.services.sink_factory)(room.id))
        .with_relationships(resources.relationships)
        .with_history(room.history.clone());
        if let Some(handler) = &self.services.event_handler {
            executor = executor.with_event_handler(handler.clone());
        }

        let slot = self.slot(room.id).await;
        let mut entry = slot.lock().await;
        match entry.take() {
            Some(RoomEntry::Client { client, task }) if !task.is_finished() => {
                *entry = Some(RoomEntry::Client { client, task });
                return Err(RegistryError::ClientRunning(room.id));
            }
            Some(RoomEntry::Pipeline { task, .. }) if !task.is_finished() => {
                log::info!("registry room_id={} cancelling previous pipeline", room.id);
                task.abort();
                let _ = task.await;
            }
            _ => {}
        }

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        log::info!(
            "registry room_id={} pipeline run {} started sender={}",
            room.id,
            run_id,
            sender
        );
        let (tx, rx) = oneshot::channel();
        let own_slot = slot.clone();
        let text = text.to_string();
        let sender = sender.to_string();
        let task = tokio::spawn(async move {
            let state = executor.run(&text, &sender).await;
            let _ = tx.send(state);

            let mut entry = own_slot.lock().await;
            if matches!(entry.as_ref(), Some(RoomEntry::Pipeline { run_id: id, .. }) if *id == run_id)
            {
                *entry = None;
            }
        });
        *entry = Some(RoomEntry::Pipeline { run_id, task });

        Ok(Some(PipelineHandle { room_id: room.id, rx }))
    }

    /// Stop whatever runs in the room and wait for it.  Returns `false` if nothing was running.
    ///
    /// The room's slot stays locked until the task has finished, so nothing new can start in
    /// the room while the old client or pipeline winds down.
    pub async fn stop_room(&self, room_id: RoomId) -> bool {
        match self.existing_slot(room_id).await {
            Some(slot) => stop_slot(room_id, &slot).await,
            None => false,
        }
    }

    /// Stop every room.  Call once at process shutdown.
    pub async fn stop_all(&self) {
        let slots = self.all_slots().await;
        if slots.is_empty() {
            return;
        }
        log::info!(
            "registry stop_all rooms={:?}",
            slots.iter().map(|(id, _)| *id).collect::<Vec<_>>()
        );
        join_all(
            slots
                .iter()
                .map(|(room_id, slot)| stop_slot(*room_id, slot)),
        )
        .await;
    }

    /// Ids of rooms with a live client or pipeline.
    pub async fn active_rooms(&self) -> Vec<RoomId> {
        let mut ids = Vec::new();
        for (room_id, slot) in self.all_slots().await {
            if matches!(slot.lock().await.as_ref(), Some(entry) if !entry.is_finished()) {
                ids.push(room_id);
            }
        }
        ids.sort_unstable();
        ids
    }
}

async fn stop_slot(room_id: RoomId, slot: &RoomSlot) -> bool {
    let mut entry = slot.lock().await;
    match entry.take() {
        Some(taken) => {
            log::info!("registry stop_room room_id={}", room_id);
            let was_running = !taken.is_finished();
            shut_down(room_id, taken).await;
            was_running
        }
        None => false,
    }
}

async fn shut_down(room_id: RoomId, entry: RoomEntry) {
    match entry {
        RoomEntry::Client { client, mut task } => {
            client.stop();
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                log::warn!("room {} client did not stop in time, aborting", room_id);
                task.abort();
                let _ = task.await;
            }
        }
        RoomEntry::Pipeline { task, .. } => {
            task.abort();
            let _ = task.await;
        }
    }
}
