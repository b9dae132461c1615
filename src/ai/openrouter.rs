// =============================================================================
// OpenRouter Client — bounded LLM chat completions
// =============================================================================
//
// One POST per decision. The whole request (connect, send, body) runs under
// a 45-second deadline; a timed-out or failed call is retried exactly once
// with a fresh request. The key travels only in the Authorization header.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

const CHAT_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Deadline for one LLM request.
pub const LLM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(45);

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 500;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenRouterClient {
    /// Build from `OPENROUTER_API_KEY`; `None` when unset (agents then
    /// always hold).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").ok()?;
        if api_key.is_empty() {
            return None;
        }
        Some(Self::new(api_key))
    }

    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .build()
                .expect("failed to build reqwest client for OpenRouter"),
            api_key,
        }
    }

    /// Run one chat completion, retrying once on timeout or transport
    /// failure. Returns the assistant message content.
    pub async fn chat(&self, model: &str, system: &str, user: &str) -> Result<String> {
        match self.chat_once(model, system, user).await {
            Ok(content) => Ok(content),
            Err(first) => {
                warn!(model, error = %first, "LLM call failed; retrying once");
                self.chat_once(model, system, user).await
            }
        }
    }

    async fn chat_once(&self, model: &str, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let fut = async {
            let resp = self
                .client
                .post(CHAT_URL)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await
                .context("POST openrouter chat completion")?;

            let status = resp.status();
            let body: serde_json::Value = resp
                .json()
                .await
                .context("failed to parse openrouter response body")?;

            if !status.is_success() {
                anyhow::bail!("openrouter returned {}: {}", status, body);
            }

            let content = body["choices"][0]["message"]["content"]
                .as_str()
                .context("openrouter response missing choices[0].message.content")?
                .to_string();

            debug!(model, chars = content.len(), "LLM reply received");
            Ok(content)
        };

        match tokio::time::timeout(LLM_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("LLM timed out after {}s", LLM_TIMEOUT.as_secs()),
        }
    }
}
