use std::sync::{Arc, Mutex};

use agentroom::chat_service::{ChatService, ChatServiceError, DEFAULT_FALLBACK_REPLY};
use agentroom::context::ConversationContext;
use agentroom::message::{Message, MessageKind};
use agentroom::strategy::{
    CharacterSelection, CircularStrategy, CircularWithSummaryStrategy, FullContextStrategy,
    NarratorStrategy, Strategy,
};
use async_trait::async_trait;

struct MockChat {
    calls: Mutex<Vec<String>>,
    failing: Vec<String>,
}

impl MockChat {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Vec::new(),
        }
    }

    fn failing(agents: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: agents.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn called(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatService for MockChat {
    async fn call(
        &self,
        agent: &str,
        _session_id: &str,
        _prompt: &str,
        _context: Option<&ConversationContext>,
    ) -> Result<String, ChatServiceError> {
        self.calls.lock().unwrap().push(agent.to_string());
        if self.failing.iter().any(|a| a == agent) {
            return Err(ChatServiceError::Backend {
                agent: agent.to_string(),
                message: "backend down".to_string(),
            });
        }
        Ok(format!("{} speaks", agent))
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

async fn run_tick(
    strategy: &mut dyn Strategy,
    agents: &[String],
    ctx: &mut ConversationContext,
) -> Vec<Message> {
    let produced = strategy.tick(agents, ctx).await.unwrap_or_default();
    ctx.extend_messages(produced.clone());
    produced
}

#[tokio::test]
async fn test_circular_answers_pending_user_message_first() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["A", "B", "C"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularStrategy::new(chat.clone());

    let immediate = strategy.handle_user_message("hi", &mut ctx).await;
    assert!(immediate.is_empty());

    let produced = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(produced.len(), 2);
    assert_eq!(produced[0].kind, MessageKind::User);
    assert_eq!(produced[0].content, "hi");
    assert_eq!(produced[1].kind, MessageKind::Agent);
    assert_eq!(produced[1].sender, "A");
    assert_eq!(strategy.current_agent_index(), 1);
    assert_eq!(chat.called(), vec!["A".to_string()]);
}

#[tokio::test]
async fn test_circular_rotates_and_counts_rounds() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["A", "B", "C"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularStrategy::new(chat.clone()).with_max_rounds(2);

    strategy.handle_user_message("topic", &mut ctx).await;
    run_tick(&mut strategy, &agents, &mut ctx).await;

    let second = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(second[0].sender, "B");

    let third = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(third[0].sender, "C");
    assert_eq!(third.len(), 2);
    assert_eq!(third[1].kind, MessageKind::System);
    assert_eq!(third[1].content, "=== Discussion continues ===");
    assert_eq!(strategy.round_count(), 2);
    assert_eq!(strategy.current_agent_index(), 0);
}

#[tokio::test]
async fn test_circular_round_count_never_exceeds_bound() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["A", "B"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularStrategy::new(chat.clone()).with_max_rounds(3);

    strategy.handle_user_message("go", &mut ctx).await;
    let mut empty_ticks = 0;
    for _ in 0..50 {
        match strategy.tick(&agents, &mut ctx).await {
            Some(produced) => ctx.extend_messages(produced),
            None => empty_ticks += 1,
        }
        assert!(strategy.round_count() <= strategy.max_rounds() + 1);
    }

    assert!(strategy.should_stop());
    assert!(empty_ticks > 0);
    // two replies per round, the first one answering the user
    let agent_replies = ctx.messages_by_kind(MessageKind::Agent).len();
    assert_eq!(agent_replies, 6);
}

#[tokio::test]
async fn test_circular_single_agent_answer_completes_a_round() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["Solo"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularStrategy::new(chat.clone()).with_max_rounds(2);

    strategy.handle_user_message("hi", &mut ctx).await;
    let answer = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(answer[1].sender, "Solo");
    assert_eq!(strategy.current_agent_index(), 0);
    assert_eq!(strategy.round_count(), 2);

    run_tick(&mut strategy, &agents, &mut ctx).await;
    assert!(strategy.should_stop());
    assert!(strategy.tick(&agents, &mut ctx).await.is_none());
    assert_eq!(chat.called().len(), 2);
}

#[tokio::test]
async fn test_circular_user_message_restarts_finished_rotation() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["A", "B"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularStrategy::new(chat.clone()).with_max_rounds(1);

    strategy.handle_user_message("first", &mut ctx).await;
    for _ in 0..5 {
        run_tick(&mut strategy, &agents, &mut ctx).await;
    }
    assert!(strategy.should_stop());

    strategy.handle_user_message("second", &mut ctx).await;
    assert!(!strategy.should_stop());
    let produced = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(produced[0].content, "second");
    assert_eq!(produced[1].sender, "A");
}

#[tokio::test]
async fn test_circular_uses_fallback_reply_on_failure() {
    let chat = Arc::new(MockChat::failing(&["A"]));
    let agents = names(&["A", "B"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularStrategy::new(chat);

    strategy.handle_user_message("hello", &mut ctx).await;
    let produced = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(produced[1].content, DEFAULT_FALLBACK_REPLY);
}

#[tokio::test]
async fn test_circular_idle_without_history_or_agents() {
    let chat = Arc::new(MockChat::new());
    let mut ctx = ConversationContext::new(Vec::new());
    let mut strategy = CircularStrategy::new(chat.clone());

    assert!(strategy.tick(&[], &mut ctx).await.is_none());
    assert!(strategy.tick(&names(&["A"]), &mut ctx).await.is_none());
    assert!(chat.called().is_empty());
}

#[tokio::test]
async fn test_narrator_alternates_story_and_characters() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["Narrator", "Knight", "Dragon"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = NarratorStrategy::new(chat.clone(), "Narrator", "A quest");

    let opening = strategy.on_start(&mut ctx).await;
    assert_eq!(opening.len(), 1);
    assert_eq!(opening[0].kind, MessageKind::Narrator);
    assert_eq!(ctx.current_topic(), Some("A quest"));
    ctx.extend_messages(opening);

    let first = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(first[0].sender, "Knight");
    let second = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(second[0].sender, "Dragon");
    assert_eq!(strategy.agent_responses_since_narration(), 2);

    let third = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(third[0].kind, MessageKind::Narrator);
    assert_eq!(third[0].sender, "Narrator");
    assert_eq!(strategy.agent_responses_since_narration(), 0);
    assert_eq!(strategy.current_scene(), 2);
    assert!(strategy.story_so_far().contains("Narrator speaks"));
}

#[tokio::test]
async fn test_narrator_least_recently_used_selection() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["Narrator", "Knight", "Dragon"]);
    let mut ctx = ConversationContext::new(agents.clone());
    ctx.add_message(Message::agent("Knight", "I ride"));
    ctx.add_message(Message::agent("Knight", "I ride faster"));

    let mut strategy = NarratorStrategy::new(chat, "Narrator", "A quest")
        .with_selection(CharacterSelection::LeastRecentlyUsed);
    let produced = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(produced[0].sender, "Dragon");
}

#[tokio::test]
async fn test_narrator_weaves_in_user_suggestion() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["Narrator", "Knight"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = NarratorStrategy::new(chat, "Narrator", "A quest");

    let produced = strategy.handle_user_message("add a storm", &mut ctx).await;
    assert_eq!(produced.len(), 2);
    assert_eq!(produced[0].kind, MessageKind::User);
    assert_eq!(produced[1].kind, MessageKind::Narrator);
    assert_eq!(strategy.ticks_since_last_narration(), 0);
}

#[tokio::test]
async fn test_full_context_iterations_and_summaries() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["A", "B", "C", "Summarizer"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = FullContextStrategy::new(chat.clone(), "Pick a city")
        .with_summary_agent("Summarizer")
        .with_max_iterations(2)
        .with_agents_per_iteration(2);

    let opening = strategy.on_start(&mut ctx).await;
    assert_eq!(opening[0].kind, MessageKind::System);
    ctx.extend_messages(opening);

    let first = run_tick(&mut strategy, &agents, &mut ctx).await;
    let senders: Vec<&str> = first.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(senders, vec!["A", "B", "Summarizer", "System"]);
    assert_eq!(first[2].kind, MessageKind::Summarized);
    assert_eq!(ctx.key_points().len(), 1);
    assert!(ctx.key_points()[0].starts_with("Step 0:"));

    let second = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(second[0].sender, "C");
    assert_eq!(second[1].sender, "A");
    assert!(strategy.should_stop());
    assert!(strategy.tick(&agents, &mut ctx).await.is_none());

    let restarted = strategy.handle_user_message("again", &mut ctx).await;
    assert_eq!(restarted[0].kind, MessageKind::User);
    assert_eq!(strategy.current_iteration(), 0);
}

#[tokio::test]
async fn test_full_context_iteration_window_wraps_without_duplicates() {
    let chat = Arc::new(MockChat::new());
    let strategy = FullContextStrategy::new(chat, "Topic").with_agents_per_iteration(5);
    let agents = names(&["A", "B"]);
    assert_eq!(strategy.iteration_agents(&agents), agents);
    assert!(strategy.iteration_agents(&[]).is_empty());
}

#[tokio::test]
async fn test_circular_with_summary_narrates_and_summarizes() {
    let chat = Arc::new(MockChat::new());
    let agents = names(&["A", "B", "Narrator", "Summarizer"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularWithSummaryStrategy::new(chat.clone(), "Narrator", "Summarizer")
        .with_max_rounds(Some(1));

    strategy.handle_user_message("plan the trip", &mut ctx).await;
    let first = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert_eq!(first[0].kind, MessageKind::User);
    assert_eq!(first[1].sender, "A");

    let second = run_tick(&mut strategy, &agents, &mut ctx).await;
    let kinds: Vec<MessageKind> = second.iter().map(|m| m.kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Agent,
            MessageKind::Narrator,
            MessageKind::Summarized,
            MessageKind::System
        ]
    );
    assert_eq!(second[0].sender, "B");
    assert_eq!(second[3].content, "=== Round 1 completed ===");
    assert_eq!(strategy.round_count(), 2);
    assert!(strategy.should_stop());
    assert!(strategy.tick(&agents, &mut ctx).await.is_none());
}

#[tokio::test]
async fn test_circular_with_summary_skips_failed_narration() {
    let chat = Arc::new(MockChat::failing(&["Narrator"]));
    let agents = names(&["A", "B", "Narrator", "Summarizer"]);
    let mut ctx = ConversationContext::new(agents.clone());
    let mut strategy = CircularWithSummaryStrategy::new(chat, "Narrator", "Summarizer");

    strategy.handle_user_message("go", &mut ctx).await;
    run_tick(&mut strategy, &agents, &mut ctx).await;
    let second = run_tick(&mut strategy, &agents, &mut ctx).await;
    assert!(second.iter().all(|m| m.kind != MessageKind::Narrator));
    assert!(second.iter().any(|m| m.kind == MessageKind::Summarized));
}
