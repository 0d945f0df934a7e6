//! Orchestration and pipeline event system.
//!
//! Provides a callback-based observability layer for rooms.  Implement [`EventHandler`] to
//! receive real-time notifications about:
//!
//! - **Client lifecycle**: start, stop, tick budget exhaustion
//! - **Turn taking**: every tick and every handled user message, with the number of messages
//!   the strategy produced
//! - **Dispatch**: each message handed to the room's sink
//! - **Pipeline progress**: stage boundaries and the final outcome of a run
//! - **Relationships**: new participants, edge updates and edges changing their
//!   [`RelationshipType`]
//!
//! All trait methods have default no-op implementations, so you only override what you care
//! about.  Handlers are shared as `Arc<dyn EventHandler>`; attach one with
//! [`OrchestrationClient::with_event_handler`](crate::orchestration_client::OrchestrationClient::with_event_handler)
//! or [`PipelineExecutor::with_event_handler`](crate::pipeline::PipelineExecutor::with_event_handler).
//!
//! # Example
//!
//! ```rust,no_run
//! use agentroom::event::{EventHandler, OrchestrationEvent, PipelineEvent};
//! use async_trait::async_trait;
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl EventHandler for MyHandler {
//!     async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
//!         if let OrchestrationEvent::TickCompleted { room_id, tick, produced } = event {
//!             println!("room {} tick {} produced {} messages", room_id, tick, produced);
//!         }
//!     }
//!     async fn on_pipeline_event(&self, event: &PipelineEvent) {
//!         println!("Pipeline: {:?}", event);
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::message::{MessageKind, RoomId};
use crate::pipeline::PipelineStage;
use crate::relationship::RelationshipType;

/// Events emitted by an [`OrchestrationClient`](crate::orchestration_client::OrchestrationClient).
#[derive(Debug, Clone)]
pub enum OrchestrationEvent {
    /// The background loops were started.
    ClientStarted {
        room_id: RoomId,
        /// Name of the active strategy.
        strategy: String,
        /// Tick budget, `None` for unbounded.
        max_ticks: Option<u64>,
    },

    /// The background loops exited.
    ClientStopped {
        room_id: RoomId,
        /// Number of ticks executed during the run.
        ticks: u64,
    },

    /// One tick of the strategy finished.
    TickCompleted {
        room_id: RoomId,
        tick: u64,
        /// Number of messages the tick produced.
        produced: usize,
    },

    /// A queued user message was handed to the strategy.
    UserMessageHandled {
        room_id: RoomId,
        sender: String,
        produced: usize,
    },

    /// A message was delivered to the sink.
    MessageDispatched {
        room_id: RoomId,
        sender: String,
        kind: MessageKind,
    },

    /// The strategy reported `should_stop()` for the first time since its last reset.
    StrategyFinished { room_id: RoomId, strategy: String },
}

/// Events emitted by a [`PipelineExecutor`](crate::pipeline::PipelineExecutor).
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A stage is about to run.
    StageStarted {
        room_id: RoomId,
        task_id: String,
        stage: PipelineStage,
    },

    /// A stage finished, successfully or not.
    StageCompleted {
        room_id: RoomId,
        task_id: String,
        stage: PipelineStage,
        /// Wall-clock time spent in the stage.
        elapsed_ms: u128,
    },

    /// The run reached [`PipelineStage::Done`].
    PipelineCompleted {
        room_id: RoomId,
        task_id: String,
        discussion_messages: usize,
        facts: usize,
        error: Option<String>,
    },
}

/// Changes recorded by a [`RelationshipManager`](crate::relationship::RelationshipManager).
///
/// The manager queues them; whoever owns it drains the queue with
/// [`take_events`](crate::relationship::RelationshipManager::take_events) and forwards them to
/// [`EventHandler::on_relationship_event`] once the manager lock is released.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipEvent {
    /// A name joined the graph.
    ParticipantAdded { name: String },

    /// An edge moved.
    RelationshipUpdated {
        from: String,
        to: String,
        old_value: f64,
        new_value: f64,
        reason: String,
        source: String,
    },

    /// An update moved an edge into another [`RelationshipType`] band.
    ThresholdReached {
        from: String,
        to: String,
        previous: RelationshipType,
        current: RelationshipType,
        value: f64,
    },
}

/// Receiver of room events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_orchestration_event(&self, _event: &OrchestrationEvent) {}

    async fn on_pipeline_event(&self, _event: &PipelineEvent) {}

    async fn on_relationship_event(&self, _room_id: RoomId, _event: &RelationshipEvent) {}
}

/// Forward drained relationship events of `room_id` to `handler`, in order.
pub async fn forward_relationship_events(
    handler: Option<&Arc<dyn EventHandler>>,
    room_id: RoomId,
    events: Vec<RelationshipEvent>,
) {
    if let Some(handler) = handler {
        for event in &events {
            handler.on_relationship_event(room_id, event).await;
        }
    }
}
