//! Background engine driving one room.
//!
//! An [`OrchestrationClient`] owns a [`Strategy`] and the room's [`ConversationContext`] and
//! runs three cooperating loops while [`OrchestrationClient::start`] is being awaited:
//!
//! * **tick loop**: every `tick_interval`, unless the strategy reports
//!   [`Strategy::should_stop`] or the tick budget is exhausted, calls [`Strategy::tick`];
//! * **user-message loop**: drains the inbound FIFO filled by
//!   [`OrchestrationClient::send_user_message`] and calls [`Strategy::handle_user_message`];
//! * **dispatch loop**: drains the outbound FIFO and hands each message to the room's
//!   [`MessageSink`] exactly once, in production order.
//!
//! The tick and user-message loops share one `select!` so that the context has a single writer.
//! Messages produced by either are appended to the history before they are queued for
//! dispatch.  A panic inside a strategy call is caught and logged and the loops keep going.
//! [`OrchestrationClient::stop`] is idempotent and interrupts an in-flight strategy call.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentroom::chat_service::AgentChatService;
//! use agentroom::orchestration_client::OrchestrationClient;
//! use agentroom::sink::ChannelSink;
//! use agentroom::strategy::CircularStrategy;
//!
//! #[tokio::main]
//! async fn main() {
//!     let chat = Arc::new(AgentChatService::new(Vec::new()));
//!     let (sink, mut rx) = ChannelSink::new(1);
//!
//!     let client = Arc::new(
//!         OrchestrationClient::new(1, vec!["Alice".into(), "Bob".into()])
//!             .with_strategy(Box::new(CircularStrategy::new(chat)))
//!             .with_sink(Arc::new(sink)),
//!     );
//!
//!     let runner = client.clone();
//!     tokio::spawn(async move { runner.start(Some(10)).await });
//!
//!     client.send_user_message("Where should we travel?").unwrap();
//!     while let Some(delivered) = rx.recv().await {
//!         println!("{}: {}", delivered.message.sender, delivered.message.content);
//!     }
//! }
//! ```

use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::context::ConversationContext;
use crate::event::{EventHandler, OrchestrationEvent};
use crate::message::{Message, RoomId, USER_SENDER};
use crate::sink::{deliver_logged, LoggingSink, MessageSink};
use crate::strategy::Strategy;

/// Default pause between two ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest accepted pause between two ticks.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// A user message waiting to be handed to the strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessageEvent {
    pub room_id: RoomId,
    pub text: String,
    pub sender: String,
}

/// Failures of the client lifecycle API.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    /// [`OrchestrationClient::start`] was called before a strategy was set.
    NoStrategy,

    /// The loops are already running.
    AlreadyRunning,

    /// The client was stopped and cannot be started again.
    Stopped,

    /// A user message addressed to another room was enqueued.
    RoomMismatch { expected: RoomId, got: RoomId },
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestrationError::NoStrategy => write!(f, "No strategy set"),
            OrchestrationError::AlreadyRunning => write!(f, "Client already running"),
            OrchestrationError::Stopped => write!(f, "Client has been stopped"),
            OrchestrationError::RoomMismatch { expected, got } => {
                write!(f, "Message for room {} sent to client of room {}", got, expected)
            }
        }
    }
}

impl Error for OrchestrationError {}

/// State only the running loops may touch.
struct ClientCore {
    strategy: Option<Box<dyn Strategy>>,
    context: ConversationContext,
    user_rx: mpsc::UnboundedReceiver<UserMessageEvent>,
}

/// Per-room background orchestration engine.
pub struct OrchestrationClient {
    room_id: RoomId,
    agents: Vec<String>,
    tick_interval: Duration,
    core: Mutex<Option<ClientCore>>,
    user_tx: mpsc::UnboundedSender<UserMessageEvent>,
    sink: Arc<dyn MessageSink>,
    event_handler: Option<Arc<dyn EventHandler>>,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    current_tick: AtomicU64,
}

impl OrchestrationClient {
    /// Create an idle client for `room_id` with the given participating agents.
    pub fn new(room_id: RoomId, agents: Vec<String>) -> Self {
        let (user_tx, user_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            room_id,
            core: Mutex::new(Some(ClientCore {
                strategy: None,
                context: ConversationContext::new(agents.clone()),
                user_rx,
            })),
            agents,
            tick_interval: DEFAULT_TICK_INTERVAL,
            user_tx,
            sink: Arc::new(LoggingSink),
            event_handler: None,
            running: AtomicBool::new(false),
            shutdown,
            current_tick: AtomicU64::new(0),
        }
    }

    /// Pause between two ticks, raised to [`MIN_TICK_INTERVAL`] if shorter.
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        if tick_interval < MIN_TICK_INTERVAL {
            log::warn!(
                "OrchestrationClient room_id={} tick interval {:?} too short, using {:?}",
                self.room_id,
                tick_interval,
                MIN_TICK_INTERVAL
            );
        }
        self.tick_interval = tick_interval.max(MIN_TICK_INTERVAL);
        self
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn with_strategy(mut self, strategy: Box<dyn Strategy>) -> Self {
        self.set_strategy(strategy);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn MessageSink>) -> Self {
        self.on_message(sink);
        self
    }

    /// Seed the context with earlier messages, e.g. loaded from storage.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        if let Some(core) = self.core.get_mut() {
            core.context.extend_messages(history);
        }
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Replace the strategy.  Only possible while the client is idle.
    pub fn set_strategy(&mut self, strategy: Box<dyn Strategy>) {
        if let Some(core) = self.core.get_mut() {
            core.strategy = Some(strategy);
        }
    }

    /// Register the sink receiving every finished message.
    pub fn on_message(&mut self, sink: Arc<dyn MessageSink>) {
        self.sink = sink;
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn agents(&self) -> &[String] {
        &self.agents
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of strategy ticks executed so far.
    pub fn current_tick(&self) -> u64 {
        self.current_tick.load(Ordering::SeqCst)
    }

    /// Copy of the conversation context.  Returns `None` while the loops are running.
    pub async fn context_snapshot(&self) -> Option<ConversationContext> {
        self.core
            .lock()
            .await
            .as_ref()
            .map(|core| core.context.clone())
    }

    /// Queue a user message for this room.
    pub fn enqueue_user_message(
        &self,
        room_id: RoomId,
        text: impl Into<String>,
        sender: impl Into<String>,
    ) -> Result<(), OrchestrationError> {
        if room_id != self.room_id {
            return Err(OrchestrationError::RoomMismatch {
                expected: self.room_id,
                got: room_id,
            });
        }
        if *self.shutdown.borrow() {
            return Err(OrchestrationError::Stopped);
        }
        self.user_tx
            .send(UserMessageEvent {
                room_id,
                text: text.into(),
                sender: sender.into(),
            })
            .map_err(|_| OrchestrationError::Stopped)
    }

    /// Queue a message typed by the default user.
    pub fn send_user_message(&self, text: impl Into<String>) -> Result<(), OrchestrationError> {
        self.enqueue_user_message(self.room_id, text, USER_SENDER)
    }

    /// Stop the loops.  Safe to call any number of times, from any task.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        if was_running {
            log::info!("OrchestrationClient room_id={} stop requested", self.room_id);
        }
    }

    async fn emit(&self, event: OrchestrationEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_orchestration_event(&event).await;
        }
    }

    /// Run the loops until [`stop`](Self::stop) is called or `max_ticks` ticks have run.
    ///
    /// The strategy's `on_start` output is dispatched first and `on_stop` runs once on exit.
    pub async fn start(&self, max_ticks: Option<u64>) -> Result<(), OrchestrationError> {
        if *self.shutdown.borrow() {
            return Err(OrchestrationError::Stopped);
        }
        let mut core = self
            .core
            .lock()
            .await
            .take()
            .ok_or(OrchestrationError::AlreadyRunning)?;
        let mut strategy = match core.strategy.take() {
            Some(strategy) => strategy,
            None => {
                *self.core.lock().await = Some(core);
                return Err(OrchestrationError::NoStrategy);
            }
        };

        self.running.store(true, Ordering::SeqCst);
        log::info!(
            "OrchestrationClient room_id={} START strategy={} max_ticks={:?}",
            self.room_id,
            strategy.name(),
            max_ticks
        );
        self.emit(OrchestrationEvent::ClientStarted {
            room_id: self.room_id,
            strategy: strategy.name().to_string(),
            max_ticks,
        })
        .await;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let opening = strategy.on_start(&mut core.context).await;
        publish(&mut core.context, opening, &out_tx);

        let actor = self.run_actor(&mut strategy, &mut core, out_tx, max_ticks);
        let dispatch = self.run_dispatch(out_rx);
        tokio::join!(actor, dispatch);

        strategy.on_stop(&mut core.context).await;
        core.strategy = Some(strategy);
        *self.core.lock().await = Some(core);

        self.running.store(false, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        let ticks = self.current_tick();
        log::info!(
            "OrchestrationClient room_id={} STOPPED ticks={}",
            self.room_id,
            ticks
        );
        self.emit(OrchestrationEvent::ClientStopped {
            room_id: self.room_id,
            ticks,
        })
        .await;
        Ok(())
    }

    async fn run_actor(
        &self,
        strategy: &mut Box<dyn Strategy>,
        core: &mut ClientCore,
        out_tx: mpsc::UnboundedSender<Message>,
        max_ticks: Option<u64>,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            return;
        }
        let mut ticker = interval_at(Instant::now() + self.tick_interval, self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut finish_reported = false;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(event) = core.user_rx.recv() => {
                    let call = AssertUnwindSafe(
                        strategy.handle_user_message(&event.text, &mut core.context),
                    )
                    .catch_unwind();
                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        outcome = call => outcome,
                    };
                    match outcome {
                        Ok(produced) => {
                            finish_reported = false;
                            let count = produced.len();
                            publish(&mut core.context, produced, &out_tx);
                            self.emit(OrchestrationEvent::UserMessageHandled {
                                room_id: self.room_id,
                                sender: event.sender,
                                produced: count,
                            })
                            .await;
                        }
                        Err(_) => log::error!(
                            "OrchestrationClient room_id={} user-message loop: strategy panicked",
                            self.room_id
                        ),
                    }
                }
                _ = ticker.tick() => {
                    if let Some(max) = max_ticks {
                        if self.current_tick() >= max {
                            log::info!(
                                "OrchestrationClient room_id={} tick budget of {} exhausted",
                                self.room_id,
                                max
                            );
                            break;
                        }
                    }
                    if strategy.should_stop() {
                        if !finish_reported {
                            finish_reported = true;
                            log::info!(
                                "OrchestrationClient room_id={} strategy {} finished",
                                self.room_id,
                                strategy.name()
                            );
                            self.emit(OrchestrationEvent::StrategyFinished {
                                room_id: self.room_id,
                                strategy: strategy.name().to_string(),
                            })
                            .await;
                        }
                        continue;
                    }

                    let tick = self.current_tick.fetch_add(1, Ordering::SeqCst) + 1;
                    let call = AssertUnwindSafe(strategy.tick(&self.agents, &mut core.context))
                        .catch_unwind();
                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        outcome = call => outcome,
                    };
                    match outcome {
                        Ok(produced) => {
                            let produced = produced.unwrap_or_default();
                            let count = produced.len();
                            publish(&mut core.context, produced, &out_tx);
                            self.emit(OrchestrationEvent::TickCompleted {
                                room_id: self.room_id,
                                tick,
                                produced: count,
                            })
                            .await;
                        }
                        Err(_) => log::error!(
                            "OrchestrationClient room_id={} tick {}: strategy panicked",
                            self.room_id,
                            tick
                        ),
                    }
                }
            }
        }
    }

    async fn run_dispatch(&self, mut out_rx: mpsc::UnboundedReceiver<Message>) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                message = out_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            deliver_logged(self.sink.as_ref(), &message).await;
            self.emit(OrchestrationEvent::MessageDispatched {
                room_id: self.room_id,
                sender: message.sender.clone(),
                kind: message.kind,
            })
            .await;
        }
    }
}

/// Append produced messages to the history and queue them for dispatch, preserving order.
fn publish(
    context: &mut ConversationContext,
    produced: Vec<Message>,
    out_tx: &mpsc::UnboundedSender<Message>,
) {
    for message in produced {
        context.add_message(message.clone());
        if out_tx.send(message).is_err() {
            log::debug!("dispatch queue closed, message kept in history only");
        }
    }
}
