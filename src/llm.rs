//! Text-completion clients.
//!
//! The assistant needs exactly one capability from a language model: turn a
//! prompt into text. [`TextCompletion`] is that seam. Two HTTP providers are
//! built in:
//!
//! | `llm.provider` | Client | Endpoint |
//! |----------------|--------|----------|
//! | `"ollama"` | [`OllamaCompletion`] | `POST {url}/api/generate` |
//! | `"openai"` | [`OpenAICompletion`] | `POST {url}/chat/completions` |
//!
//! Each `complete` call is a single HTTP request. Callers decide whether a
//! failure is fatal; nothing here retries.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;

#[async_trait]
pub trait TextCompletion: Send + Sync {
    fn model_name(&self) -> &str;

    /// Complete `prompt`, returning the generated text.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Check that the service is reachable. Called once when the
    /// orchestrator is first built.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

async fn read_json(response: reqwest::Response, service: &str) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("{} API error {}: {}", service, status, body);
    }
    Ok(response.json().await?)
}

/// Client for Ollama's generate endpoint with streaming disabled.
pub struct OllamaCompletion {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OllamaCompletion {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: config.base_url(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl TextCompletion for OllamaCompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": self.temperature },
        });
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "ollama generate");
        let response = self
            .client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Ollama connection error (is Ollama running at {}?)", self.url))?;
        let json = read_json(response, "Ollama").await?;
        json.get("response")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing 'response' field"))
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.url))
            .send()
            .await
            .with_context(|| format!("Ollama is not reachable at {}", self.url))?;
        read_json(response, "Ollama").await.map(|_| ())
    }
}

/// Client for any OpenAI-compatible chat-completions API.
/// The bearer token comes from `OPENAI_API_KEY` and may be absent for
/// self-hosted servers.
pub struct OpenAICompletion {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAICompletion {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            url: config.base_url(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl TextCompletion for OpenAICompletion {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "chat completion");
        let response = self
            .authorized(self.client.post(format!("{}/chat/completions", self.url)))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Completion service unreachable at {}", self.url))?;
        let json = read_json(response, "OpenAI").await?;
        parse_chat_completion(&json)
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .authorized(self.client.get(format!("{}/models", self.url)))
            .send()
            .await
            .with_context(|| format!("Completion service unreachable at {}", self.url))?;
        read_json(response, "OpenAI").await.map(|_| ())
    }
}

fn parse_chat_completion(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing choices[0].message.content"))
}

pub fn create_completion(config: &LlmConfig) -> Result<Arc<dyn TextCompletion>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaCompletion::new(config)?)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_completion_content_is_extracted() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "policy" } }]
        });
        assert_eq!(parse_chat_completion(&json).unwrap(), "policy");
    }

    #[test]
    fn malformed_chat_completion_is_an_error() {
        assert!(parse_chat_completion(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn provider_selection() {
        let mut config = LlmConfig::default();
        let client = create_completion(&config).unwrap();
        assert_eq!(client.model_name(), "llama3.2:3b");

        config.provider = "palm".to_string();
        assert!(create_completion(&config).is_err());
    }

    #[tokio::test]
    async fn unreachable_ollama_fails_ping() {
        let config = LlmConfig {
            url: Some("http://127.0.0.1:9".to_string()),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let client = OllamaCompletion::new(&config).unwrap();
        assert!(client.ping().await.is_err());
    }
}
