use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentroom::chat_service::{ChatService, ChatServiceError};
use agentroom::context::ConversationContext;
use agentroom::event::{EventHandler, OrchestrationEvent};
use agentroom::message::{Message, MessageKind};
use agentroom::orchestration_client::{
    OrchestrationClient, OrchestrationError, MIN_TICK_INTERVAL,
};
use agentroom::sink::ChannelSink;
use agentroom::strategy::{CircularStrategy, Strategy};
use async_trait::async_trait;
use tokio::time::timeout;

struct EchoChat;

#[async_trait]
impl ChatService for EchoChat {
    async fn call(
        &self,
        agent: &str,
        _session_id: &str,
        _prompt: &str,
        _context: Option<&ConversationContext>,
    ) -> Result<String, ChatServiceError> {
        Ok(format!("{} replies", agent))
    }
}

/// Panics on its first tick, then produces one message per tick.
struct FlakyStrategy {
    ticks: AtomicUsize,
}

#[async_trait]
impl Strategy for FlakyStrategy {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn tick(
        &mut self,
        _agents: &[String],
        _ctx: &mut ConversationContext,
    ) -> Option<Vec<Message>> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if tick == 1 {
            panic!("first tick fails");
        }
        Some(vec![Message::agent("A", format!("tick {}", tick))])
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
struct RecordingHandler {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_orchestration_event(&self, event: &OrchestrationEvent) {
        let label = match event {
            OrchestrationEvent::ClientStarted { .. } => "started",
            OrchestrationEvent::ClientStopped { .. } => "stopped",
            OrchestrationEvent::TickCompleted { .. } => "tick",
            OrchestrationEvent::UserMessageHandled { .. } => "user",
            OrchestrationEvent::MessageDispatched { .. } => "dispatched",
            OrchestrationEvent::StrategyFinished { .. } => "finished",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

fn agents() -> Vec<String> {
    vec!["A".to_string(), "B".to_string(), "C".to_string()]
}

#[tokio::test]
async fn test_start_requires_strategy() {
    let client = OrchestrationClient::new(1, agents());
    assert_eq!(client.start(Some(1)).await, Err(OrchestrationError::NoStrategy));
    assert!(!client.is_running());
}

#[tokio::test]
async fn test_user_message_flows_to_sink_in_order() {
    let (sink, mut rx) = ChannelSink::new(3);
    let client = OrchestrationClient::new(3, agents())
        .with_tick_interval(Duration::from_millis(5))
        .with_strategy(Box::new(CircularStrategy::new(Arc::new(EchoChat))))
        .with_sink(Arc::new(sink));

    client.send_user_message("hello room").unwrap();
    timeout(Duration::from_secs(5), client.start(Some(3)))
        .await
        .expect("client finished")
        .unwrap();

    let mut delivered = Vec::new();
    while let Ok(item) = rx.try_recv() {
        assert_eq!(item.room_id, 3);
        delivered.push(item.message);
    }

    let senders: Vec<&str> = delivered.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, vec!["user", "A", "B", "C", "System"]);
    assert_eq!(delivered[0].kind, MessageKind::User);
    assert_eq!(delivered[0].content, "hello room");
    assert_eq!(client.current_tick(), 3);

    let ctx = client.context_snapshot().await.unwrap();
    assert_eq!(ctx.history(), delivered.as_slice());
}

#[tokio::test]
async fn test_stop_is_idempotent_and_final() {
    let client = Arc::new(
        OrchestrationClient::new(9, agents())
            .with_tick_interval(Duration::from_millis(5))
            .with_strategy(Box::new(CircularStrategy::new(Arc::new(EchoChat)))),
    );

    let runner = client.clone();
    let task = tokio::spawn(async move { runner.start(None).await });
    tokio::time::sleep(Duration::from_millis(30)).await;

    client.stop();
    client.stop();
    let outcome = timeout(Duration::from_secs(5), task)
        .await
        .expect("loops exited")
        .unwrap();
    assert!(outcome.is_ok());
    assert!(!client.is_running());

    client.stop();
    assert_eq!(client.start(Some(1)).await, Err(OrchestrationError::Stopped));
    assert_eq!(
        client.send_user_message("too late"),
        Err(OrchestrationError::Stopped)
    );
}

#[tokio::test]
async fn test_stop_before_start_prevents_running() {
    let client = OrchestrationClient::new(2, agents())
        .with_strategy(Box::new(CircularStrategy::new(Arc::new(EchoChat))));
    client.stop();
    assert_eq!(client.start(None).await, Err(OrchestrationError::Stopped));
}

#[tokio::test]
async fn test_enqueue_rejects_other_rooms() {
    let client = OrchestrationClient::new(4, agents());
    assert_eq!(
        client.enqueue_user_message(5, "hi", "user"),
        Err(OrchestrationError::RoomMismatch {
            expected: 4,
            got: 5
        })
    );
    assert!(client.enqueue_user_message(4, "hi", "user").is_ok());
}

#[tokio::test]
async fn test_panicking_tick_does_not_kill_the_loop() {
    let handler = Arc::new(RecordingHandler::default());
    let client = OrchestrationClient::new(6, agents())
        .with_tick_interval(Duration::from_millis(5))
        .with_strategy(Box::new(FlakyStrategy {
            ticks: AtomicUsize::new(0),
        }))
        .with_event_handler(handler.clone());

    timeout(Duration::from_secs(5), client.start(Some(3)))
        .await
        .expect("client finished")
        .unwrap();

    let ctx = client.context_snapshot().await.unwrap();
    let contents: Vec<&str> = ctx.history().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["tick 2", "tick 3"]);

    let events = handler.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("started"));
    assert_eq!(events.last().map(String::as_str), Some("stopped"));
    assert_eq!(events.iter().filter(|e| *e == "tick").count(), 2);
}

#[tokio::test]
async fn test_finished_strategy_idles_until_budget() {
    let handler = Arc::new(RecordingHandler::default());
    let strategy = CircularStrategy::new(Arc::new(EchoChat)).with_max_rounds(0);
    let client = OrchestrationClient::new(8, agents())
        .with_tick_interval(Duration::from_millis(5))
        .with_strategy(Box::new(strategy))
        .with_event_handler(handler.clone());

    let client = Arc::new(client);
    let runner = client.clone();
    let task = tokio::spawn(async move { runner.start(None).await });
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(client.current_tick(), 0);
    client.stop();
    timeout(Duration::from_secs(5), task)
        .await
        .expect("loops exited")
        .unwrap()
        .unwrap();

    let events = handler.events.lock().unwrap().clone();
    assert_eq!(events.iter().filter(|e| *e == "finished").count(), 1);
}

#[tokio::test]
async fn test_zero_tick_interval_is_raised_to_minimum() {
    let client = OrchestrationClient::new(12, agents())
        .with_tick_interval(Duration::ZERO)
        .with_strategy(Box::new(FlakyStrategy {
            ticks: AtomicUsize::new(1),
        }));
    assert_eq!(client.tick_interval(), MIN_TICK_INTERVAL);

    timeout(Duration::from_secs(5), client.start(Some(3)))
        .await
        .expect("client finished")
        .unwrap();
    assert_eq!(client.current_tick(), 3);
    assert!(!client.is_running());
}
