//! Task lifecycle state machine.
//!
//! Every user message handled by the [`PipelineExecutor`](super::PipelineExecutor) walks the
//! stages below strictly in order.  A stage may only move forward to its successor, or jump to
//! [`PipelineStage::Done`] when the run is aborted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{Message, RoomId};

/// Stages of a pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    NewTask,
    RetrieveMemory,
    Plan,
    Discuss,
    Synthesize,
    StoreMemory,
    FactExtraction,
    UpdateGraph,
    Done,
}

impl PipelineStage {
    /// All stages in execution order.
    pub const ALL: [PipelineStage; 9] = [
        PipelineStage::NewTask,
        PipelineStage::RetrieveMemory,
        PipelineStage::Plan,
        PipelineStage::Discuss,
        PipelineStage::Synthesize,
        PipelineStage::StoreMemory,
        PipelineStage::FactExtraction,
        PipelineStage::UpdateGraph,
        PipelineStage::Done,
    ];

    /// The following stage, or `None` at [`PipelineStage::Done`].
    ///
    /// ```rust
    /// use agentroom::pipeline::PipelineStage;
    ///
    /// assert_eq!(PipelineStage::Discuss.next(), Some(PipelineStage::Synthesize));
    /// assert_eq!(PipelineStage::Done.next(), None);
    /// ```
    pub fn next(self) -> Option<PipelineStage> {
        let idx = Self::ALL.iter().position(|s| *s == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::NewTask => "NEW_TASK",
            PipelineStage::RetrieveMemory => "RETRIEVE_MEMORY",
            PipelineStage::Plan => "PLAN",
            PipelineStage::Discuss => "DISCUSS",
            PipelineStage::Synthesize => "SYNTHESIZE",
            PipelineStage::StoreMemory => "STORE_MEMORY",
            PipelineStage::FactExtraction => "FACT_EXTRACTION",
            PipelineStage::UpdateGraph => "UPDATE_GRAPH",
            PipelineStage::Done => "DONE",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(subject, predicate, object)` triple extracted from a discussion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    /// Sender of the message the fact came from, empty when unknown.
    #[serde(default)]
    pub source: String,
}

impl Fact {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            source: String::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Everything known about one pipeline run.  Created per user message.
#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    /// Unique id of this run, used in logs and events.
    pub task_id: String,
    pub user_message: String,
    pub room_id: RoomId,
    pub sender: String,
    pub agent_names: Vec<String>,
    pub stage: PipelineStage,
    pub memory_context: Option<String>,
    pub plan: Option<String>,
    pub discussion_messages: Vec<Message>,
    pub synthesized_answer: Option<String>,
    pub memory_stored: bool,
    pub extracted_facts: Vec<Fact>,
    pub graph_updated: bool,
    /// First unexpected failure, if any.  Callers must check it.
    pub error: Option<String>,
}

impl TaskState {
    pub fn new(
        user_message: impl Into<String>,
        room_id: RoomId,
        sender: impl Into<String>,
        agent_names: Vec<String>,
    ) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            user_message: user_message.into(),
            room_id,
            sender: sender.into(),
            agent_names,
            stage: PipelineStage::NewTask,
            memory_context: None,
            plan: None,
            discussion_messages: Vec::new(),
            synthesized_answer: None,
            memory_stored: false,
            extracted_facts: Vec::new(),
            graph_updated: false,
            error: None,
        }
    }

    /// Move to the following stage.  Returns the new stage, or `None` if already done.
    pub fn advance(&mut self) -> Option<PipelineStage> {
        let next = self.stage.next()?;
        self.stage = next;
        Some(next)
    }

    /// Jump straight to [`PipelineStage::Done`].
    pub fn finish(&mut self) {
        self.stage = PipelineStage::Done;
    }

    pub fn is_done(&self) -> bool {
        self.stage == PipelineStage::Done
    }

    /// Record a failure, keeping the first one if several occur.
    pub fn record_error(&mut self, error: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(error.into());
        }
    }

    /// Discussion rendered as `sender: content` lines.
    pub fn transcript(&self) -> String {
        self.discussion_messages
            .iter()
            .map(|m| m.transcript_line())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
