//! Delivery of finished messages to whoever is watching a room.
//!
//! The [`OrchestrationClient`](crate::orchestration_client::OrchestrationClient) dispatch loop and
//! the pipeline's live forwarding both hand messages to a [`MessageSink`].  A failing sink is
//! logged and otherwise ignored, so a disconnected observer can never stall a conversation.

use std::error::Error;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::message::{Message, MessageKind, RoomId};

/// Failure reported by a [`MessageSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkError {
    /// The receiving side has gone away.
    Closed,
    /// Delivery failed for another reason.
    Delivery(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Closed => write!(f, "Sink closed"),
            SinkError::Delivery(msg) => write!(f, "Delivery failed: {}", msg),
        }
    }
}

impl Error for SinkError {}

/// Receiver of finished messages.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError>;
}

/// Default sink: writes every message to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

fn icon(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::User => "👤",
        MessageKind::Agent => "🤖",
        MessageKind::System => "⚙️",
        MessageKind::Narrator => "📖",
        MessageKind::ContextUpdate => "🔄",
        MessageKind::Summarized => "📝",
    }
}

#[async_trait]
impl MessageSink for LoggingSink {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        log::info!(
            "{} [{}] {}: {}",
            icon(message.kind),
            message.kind,
            message.sender,
            message.content
        );
        Ok(())
    }
}

/// A message tagged with the room it was produced in.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomMessage {
    pub room_id: RoomId,
    pub message: Message,
}

/// Sink forwarding messages into an unbounded tokio channel.
///
/// ```rust
/// use agentroom::message::Message;
/// use agentroom::sink::{ChannelSink, MessageSink};
///
/// #[tokio::main]
/// async fn main() {
///     let (sink, mut rx) = ChannelSink::new(7);
///     sink.deliver(&Message::agent("Alice", "hello")).await.unwrap();
///
///     let received = rx.recv().await.unwrap();
///     assert_eq!(received.room_id, 7);
///     assert_eq!(received.message.content, "hello");
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelSink {
    room_id: RoomId,
    tx: mpsc::UnboundedSender<RoomMessage>,
}

impl ChannelSink {
    /// Create a sink for `room_id` together with the receiving end of its channel.
    pub fn new(room_id: RoomId) -> (Self, mpsc::UnboundedReceiver<RoomMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { room_id, tx }, rx)
    }

    /// Create a sink for `room_id` sharing an existing channel, e.g. one fan-in for all rooms.
    pub fn with_sender(room_id: RoomId, tx: mpsc::UnboundedSender<RoomMessage>) -> Self {
        Self { room_id, tx }
    }
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        self.tx
            .send(RoomMessage {
                room_id: self.room_id,
                message: message.clone(),
            })
            .map_err(|_| SinkError::Closed)
    }
}

/// Sink calling a synchronous closure, handy for tests and simple integrations.
pub struct CallbackSink<F>
where
    F: Fn(&Message) -> Result<(), SinkError> + Send + Sync,
{
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(&Message) -> Result<(), SinkError> + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> MessageSink for CallbackSink<F>
where
    F: Fn(&Message) -> Result<(), SinkError> + Send + Sync,
{
    async fn deliver(&self, message: &Message) -> Result<(), SinkError> {
        (self.callback)(message)
    }
}

/// Deliver `message`, logging instead of propagating a failure.
pub async fn deliver_logged(sink: &dyn MessageSink, message: &Message) {
    if let Err(err) = sink.deliver(message).await {
        log::warn!(
            "sink delivery failed for message from {}: {}",
            message.sender,
            err
        );
    }
}
