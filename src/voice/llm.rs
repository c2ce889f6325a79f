//! Chat-completion LLM client: `{model, messages, temperature, max_tokens,
//! stream:false}` in, a single reply string out. Two strategies: a cloud
//! chat-completions endpoint, and a local generate-style endpoint.

use crate::config::Config;
use crate::error::VoiceError;
use crate::voice::types::{ConversationHistory, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const LLM_FAILURE_PLACEHOLDER: &str = "[Error generating response]";

const RETRY_BACKOFFS_MS: [u64; 2] = [200, 600];

#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, history: &ConversationHistory) -> Result<String, VoiceError>;
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Cloud chat-completions backend (OpenAI-compatible contract).
pub struct CloudLlmBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl CloudLlmBackend {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
        }
    }

    async fn call_once(&self, history: &ConversationHistory) -> Result<String, VoiceError> {
        let messages: Vec<ChatRequestMessage> = history
            .as_slice()
            .iter()
            .map(|m| ChatRequestMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let req = ChatRequest {
            model: &self.model,
            messages,
            temperature: 0.7,
            max_tokens: 200,
            stream: false,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| VoiceError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(VoiceError::Transient(format!("llm {status}")));
        }
        if !status.is_success() {
            return Err(VoiceError::PermanentClient(format!("llm {status}")));
        }

        let body: ChatResponse = resp.json().await.map_err(|e| VoiceError::Transient(e.to_string()))?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| VoiceError::Internal("llm response had no choices".into()))
    }
}

#[async_trait]
impl LlmBackend for CloudLlmBackend {
    async fn complete(&self, history: &ConversationHistory) -> Result<String, VoiceError> {
        retry_on_5xx(|| self.call_once(history)).await
    }
}

/// Retry a transient-erroring call up to twice, sleeping {200ms, 600ms}
/// between attempts, matching the LLM retry policy.
async fn retry_on_5xx<F, Fut>(mut f: F) -> Result<String, VoiceError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<String, VoiceError>>,
{
    let mut last_err = None;
    for attempt in 0..=RETRY_BACKOFFS_MS.len() {
        match f().await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() && attempt < RETRY_BACKOFFS_MS.len() => {
                tracing::warn!(attempt, error = %e, "llm call failed, retrying");
                tokio::time::sleep(Duration::from_millis(RETRY_BACKOFFS_MS[attempt])).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| VoiceError::Internal("retry loop exhausted without an error".into())))
}

/// Local generate-style backend (e.g. an Ollama-compatible endpoint).
pub struct LocalLlmBackend {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl LocalLlmBackend {
    pub fn new(endpoint: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            model,
        }
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl LlmBackend for LocalLlmBackend {
    async fn complete(&self, history: &ConversationHistory) -> Result<String, VoiceError> {
        let prompt = flatten_history(history);
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: 200,
                temperature: 0.7,
            },
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&req)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| VoiceError::Transient(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(VoiceError::Transient(format!("local llm {}", resp.status())));
        }
        let body: GenerateResponse = resp.json().await.map_err(|e| VoiceError::Transient(e.to_string()))?;
        Ok(body.response.trim().to_string())
    }
}

fn flatten_history(history: &ConversationHistory) -> String {
    history
        .as_slice()
        .iter()
        .map(|m| match m.role {
            Role::System => format!("System: {}", m.content),
            Role::User => format!("User: {}", m.content),
            Role::Assistant => format!("Assistant: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_backend(cfg: &Config) -> Box<dyn LlmBackend> {
    match cfg.llm_strategy {
        crate::config::Strategy::CloudApi => {
            Box::new(CloudLlmBackend::new(cfg.openai_api_key.clone(), cfg.llm_model.clone()))
        }
        crate::config::Strategy::LocalModel => {
            Box::new(LocalLlmBackend::new(cfg.local_llm_url.clone(), cfg.llm_model.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn retry_on_5xx_succeeds_after_two_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let result = retry_on_5xx(move || {
            let calls = calls2.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(VoiceError::Transient("503".into()))
                } else {
                    Ok("final answer".to_string())
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "final answer");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_on_5xx_gives_up_after_max_retries() {
        let result: Result<String, VoiceError> =
            retry_on_5xx(|| async { Err(VoiceError::Transient("always".into())) }).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn permanent_client_error_is_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let _ = retry_on_5xx(move || {
            let calls = calls2.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(VoiceError::PermanentClient("400".into()))
            }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
