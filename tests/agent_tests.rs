use async_trait::async_trait;
use agentroom::chat_service::{AgentChatService, ChatService, ChatServiceError};
use agentroom::client_wrapper::{ClientResult, ClientWrapper, PromptMessage, Role, TokenUsage};
use agentroom::context::ConversationContext;
use agentroom::message::Message;
use agentroom::{Agent, OrchestrationConfig};
use std::sync::{Arc, Mutex};

struct MockClient {
    response: Option<String>,
    seen: Mutex<Vec<Vec<PromptMessage>>>,
    usage: Mutex<Option<TokenUsage>>,
}

impl MockClient {
    fn replying(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Some(response.to_string()),
            seen: Mutex::new(Vec::new()),
            usage: Mutex::new(None),
        })
    }

    fn broken() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            seen: Mutex::new(Vec::new()),
            usage: Mutex::new(None),
        })
    }
}

#[async_trait]
impl ClientWrapper for MockClient {
    fn model_name(&self) -> &str {
        "mock"
    }

    async fn send_message(&self, messages: &[PromptMessage]) -> ClientResult<PromptMessage> {
        self.seen.lock().unwrap().push(messages.to_vec());
        match &self.response {
            Some(text) => {
                *self.usage.lock().unwrap() = Some(TokenUsage {
                    input_tokens: messages.len(),
                    output_tokens: 1,
                    total_tokens: messages.len() + 1,
                });
                Ok(PromptMessage::new(Role::Assistant, text.clone()))
            }
            None => Err("connection refused".into()),
        }
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[test]
fn test_system_prompt_carries_persona() {
    let agent = Agent::new("Alice", MockClient::replying("hi"))
        .with_expertise("Travel")
        .with_personality("Cheerful")
        .with_metadata("team", "blue");

    let prompt = agent.system_prompt();
    assert!(prompt.contains("You are Alice"));
    assert!(prompt.contains("Expertise: Travel"));
    assert!(prompt.contains("Personality: Cheerful"));
    assert_eq!(agent.metadata.get("team"), Some(&"blue".to_string()));
    assert_eq!(agent.model_name(), "mock");
}

#[tokio::test]
async fn test_respond_sends_context_before_prompt() {
    let client = MockClient::replying("  Sure thing.  ");
    let agent = Agent::new("Bob", client.clone());

    let reply = agent.respond("Plan dinner", Some("Alice: hungry")).await.unwrap();
    assert_eq!(reply, "Sure thing.");

    let seen = client.seen.lock().unwrap();
    let roles: Vec<Role> = seen[0].iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::System, Role::User, Role::User]);
    assert!(seen[0][1].content.contains("Alice: hungry"));
    assert_eq!(seen[0][2].content, "Plan dinner");
}

#[tokio::test]
async fn test_chat_service_renders_recent_context() {
    let client = MockClient::replying("ok");
    let service =
        AgentChatService::new(vec![Agent::new("Bob", client.clone())]).with_context_window(2);

    let mut ctx = ConversationContext::new(vec!["Bob".to_string()]);
    ctx.add_message(Message::user("user", "first"));
    ctx.add_message(Message::agent("Bob", "second"));
    ctx.add_message(Message::user("user", "third"));

    let reply = service.call("Bob", "s1", "go on", Some(&ctx)).await.unwrap();
    assert_eq!(reply, "ok");

    let seen = client.seen.lock().unwrap();
    let context = &seen[0][1].content;
    assert!(!context.contains("first"));
    assert!(context.contains("Bob: second"));
    assert!(context.contains("user: third"));
}

#[tokio::test]
async fn test_chat_service_errors_and_fallbacks() {
    let service = AgentChatService::new(vec![
        Agent::new("Empty", MockClient::replying("   ")),
        Agent::new("Broken", MockClient::broken()),
    ])
    .with_fallback_reply("Let me think.");

    assert_eq!(service.agent_names(), vec!["Broken", "Empty"]);
    assert_eq!(
        service.call("Ghost", "s", "hi", None).await,
        Err(ChatServiceError::AgentNotFound("Ghost".to_string()))
    );
    assert_eq!(
        service.call("Empty", "s", "hi", None).await,
        Err(ChatServiceError::EmptyResponse("Empty".to_string()))
    );
    assert!(matches!(
        service.call("Broken", "s", "hi", None).await,
        Err(ChatServiceError::Backend { .. })
    ));

    assert_eq!(
        service.call_or_fallback("Ghost", "s", "hi", None).await,
        "[Ghost] agent not found"
    );
    assert_eq!(
        service.call_or_fallback("Broken", "s", "hi", None).await,
        "Let me think."
    );
}

#[tokio::test]
async fn test_respond_reports_backend_usage() {
    let agent = Agent::new("Carol", MockClient::replying("done"));
    assert_eq!(agent.last_usage(), None);

    agent.respond("Summarize", Some("Bob: idea")).await.unwrap();
    assert_eq!(
        agent.last_usage(),
        Some(TokenUsage {
            input_tokens: 3,
            output_tokens: 1,
            total_tokens: 4,
        })
    );
}

#[tokio::test]
async fn test_chat_service_takes_window_and_fallback_from_config() {
    let client = MockClient::replying("ok");
    let config = OrchestrationConfig {
        context_window: 1,
        fallback_reply: "One second.".to_string(),
        ..Default::default()
    };
    let service = AgentChatService::new(vec![
        Agent::new("Bob", client.clone()),
        Agent::new("Broken", MockClient::broken()),
    ])
    .with_config(&config);

    let mut ctx = ConversationContext::new(vec!["Bob".to_string()]);
    ctx.add_message(Message::user("user", "older"));
    ctx.add_message(Message::user("user", "newest"));

    service.call("Bob", "s", "go", Some(&ctx)).await.unwrap();
    let context = client.seen.lock().unwrap()[0][1].content.clone();
    assert!(context.contains("user: newest"));
    assert!(!context.contains("older"));

    assert_eq!(
        service.call_or_fallback("Broken", "s", "hi", None).await,
        "One second."
    );
}
