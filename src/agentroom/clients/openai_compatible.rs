//! [`ClientWrapper`] for any OpenAI compatible `/v1/chat/completions` endpoint.
//!
//! The client captures the token usage reported by the server after every request, so callers
//! can inspect it with [`ClientWrapper::get_last_usage`].
//!
//! # Example
//!
//! ```rust,no_run
//! use agentroom::clients::openai_compatible::OpenAiCompatibleClient;
//! use agentroom::client_wrapper::{ClientWrapper, PromptMessage, Role};
//!
//! #[tokio::main]
//! async fn main() {
//!     let secret_key = std::env::var("OPEN_AI_SECRET").expect("OPEN_AI_SECRET not set");
//!     let client = OpenAiCompatibleClient::new(&secret_key, "gpt-4.1-nano", "https://api.openai.com");
//!
//!     let resp = client.send_message(&[
//!         PromptMessage::new(Role::System, "You are an assistant."),
//!         PromptMessage::new(Role::User, "Hello!"),
//!     ]).await.unwrap();
//!     println!("Assistant: {}", resp.content);
//!
//!     if let Some(usage) = client.get_last_usage() {
//!         println!("Tokens used: {}", usage.total_tokens);
//!     }
//! }
//! ```

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client_wrapper::{ClientResult, ClientWrapper, PromptMessage, Role, TokenUsage};
use crate::clients::http_pool::get_http_client;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: usize,
    #[serde(default)]
    completion_tokens: usize,
    #[serde(default)]
    total_tokens: usize,
}

/// Client wrapper for OpenAI compatible chat-completion APIs.
pub struct OpenAiCompatibleClient {
    secret_key: String,
    model: String,
    base_url: String,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAiCompatibleClient {
    /// Construct a client for `model_name` served at `base_url` (without the API path).
    pub fn new(secret_key: &str, model_name: &str, base_url: &str) -> Self {
        OpenAiCompatibleClient {
            secret_key: secret_key.to_string(),
            model: model_name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token_usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(&self, messages: &[PromptMessage]) -> ClientResult<PromptMessage> {
        let request = ChatRequest {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_owned(),
                    content: m.content.clone(),
                })
                .collect(),
        };

        let url = format!("{}{}", self.base_url, CHAT_COMPLETIONS_PATH);
        let response = get_http_client(&self.base_url)
            .post(&url)
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!(
                "OpenAiCompatibleClient::send_message(...): {} returned {}: {}",
                url,
                status,
                body
            );
            return Err(format!("chat completion request failed with status {}", status).into());
        }

        let parsed: ChatResponse = response.json().await?;
        if let Some(usage) = parsed.usage {
            if let Ok(mut slot) = self.token_usage.lock() {
                *slot = Some(TokenUsage {
                    input_tokens: usage.prompt_tokens,
                    output_tokens: usage.completion_tokens,
                    total_tokens: usage.total_tokens,
                });
            }
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or("chat completion response contained no choices")?;

        Ok(PromptMessage {
            role: Role::Assistant,
            content,
        })
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
