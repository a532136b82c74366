//! LLM backend implementations
//!
//! Two backend shapes: a local cooperative inference server speaking the
//! Ollama chat API, and hosted OpenAI-compatible chat-completion endpoints.
//! Model selection is by `provider:model` URI.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use quarry_core::{FinishReason, GenerateRequest, GenerateResponse, Message, TokenUsage};

use crate::LlmError;

/// Which semaphore a backend draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderFamily {
    Local,
    Hosted,
}

/// Parsed `provider:model` selector, e.g. `local:qwen2.5:14b-instruct` or
/// `openai:gpt-4o-mini`. Everything after the first colon is the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderUri {
    pub provider: String,
    pub model: String,
}

impl ProviderUri {
    pub fn parse(uri: &str) -> Result<Self, LlmError> {
        match uri.split_once(':') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(Self {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
            _ => Err(LlmError::Configuration(format!(
                "expected provider:model, got {uri:?}"
            ))),
        }
    }

    pub fn family(&self) -> ProviderFamily {
        if self.provider == "local" {
            ProviderFamily::Local
        } else {
            ProviderFamily::Hosted
        }
    }
}

impl std::fmt::Display for ProviderUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Backend interface. One instance per provider; the adapter owns routing,
/// concurrency, and retries.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Single non-streaming generation. `model` overrides the backend
    /// default when non-empty.
    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, LlmError>;

    /// Check reachability without generating.
    async fn is_available(&self) -> bool;

    fn family(&self) -> ProviderFamily;

    /// Provider name for logging and request records.
    fn provider_name(&self) -> &str;
}

/// Local inference server configuration.
#[derive(Debug, Clone)]
pub struct LocalConfig {
    pub endpoint: String,
    pub default_model: String,
    pub timeout: Duration,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            default_model: "qwen2.5:14b-instruct".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Backend for a local Ollama-style server.
#[derive(Clone)]
pub struct LocalBackend {
    client: Client,
    config: LocalConfig,
}

impl LocalBackend {
    pub fn new(config: LocalConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.config.endpoint, path)
    }
}

#[async_trait]
impl LlmBackend for LocalBackend {
    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, LlmError> {
        let start = Instant::now();
        let model = if model.is_empty() { &self.config.default_model } else { model };

        let body = OllamaChatRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(Into::into).collect(),
            stream: false,
            format: request.json_mode.then(|| "json".to_string()),
            options: Some(OllamaOptions {
                temperature: request.temperature,
                top_p: request.top_p,
                num_predict: request.max_tokens.map(|n| n as i32),
            }),
        };

        let response = self.client.post(self.api_url("/chat")).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &text));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(GenerateResponse {
            text: parsed.message.content,
            usage: TokenUsage {
                tokens_in: parsed.prompt_eval_count.unwrap_or(0),
                tokens_out: parsed.eval_count.unwrap_or(0),
            },
            duration_ms: start.elapsed().as_millis() as u64,
            finish_reason: if parsed.done { FinishReason::Stop } else { FinishReason::Length },
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/api/tags", self.config.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Local
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}

/// Hosted chat-API configuration. Any OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub provider_name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub timeout: Duration,
}

/// Backend for hosted OpenAI-compatible chat endpoints.
#[derive(Clone)]
pub struct HostedBackend {
    client: Client,
    config: HostedConfig,
}

impl HostedBackend {
    pub fn new(config: HostedConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for HostedBackend {
    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, LlmError> {
        let start = Instant::now();
        let model = if model.is_empty() { &self.config.default_model } else { model };

        let body = ChatCompletionRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(Into::into).collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            response_format: request
                .json_mode
                .then(|| ResponseFormat { format_type: "json_object".to_string() }),
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.config.endpoint))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_failure(status, &text));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

        Ok(GenerateResponse {
            text: choice.message.content.unwrap_or_default(),
            usage: TokenUsage {
                tokens_in: parsed.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                tokens_out: parsed.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0),
            },
            duration_ms: start.elapsed().as_millis() as u64,
            finish_reason: match choice.finish_reason.as_deref() {
                Some("length") => FinishReason::Length,
                _ => FinishReason::Stop,
            },
        })
    }

    async fn is_available(&self) -> bool {
        // Hosted endpoints have no cheap unauthenticated probe; assume up
        // and let the first call classify failures.
        true
    }

    fn family(&self) -> ProviderFamily {
        ProviderFamily::Hosted
    }

    fn provider_name(&self) -> &str {
        &self.config.provider_name
    }
}

/// Map an HTTP failure onto the adapter taxonomy.
fn classify_http_failure(status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        429 => LlmError::RateLimited(truncate(body)),
        401 | 403 => LlmError::Auth(truncate(body)),
        400 | 413 if body.contains("context") || body.contains("length") => {
            LlmError::ContextLength(truncate(body))
        }
        s if (500..600).contains(&s) => LlmError::Network(format!("{status}: {}", truncate(body))),
        _ => LlmError::Api(format!("{status}: {}", truncate(body))),
    }
}

fn truncate(s: &str) -> String {
    const LIMIT: usize = 300;
    if s.len() <= LIMIT {
        return s.to_string();
    }
    let mut end = LIMIT;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: WireMessageOwned,
    done: bool,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

// OpenAI-compatible API types

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

impl From<&Message> for WireMessage {
    fn from(msg: &Message) -> Self {
        Self { role: msg.role.to_string(), content: msg.content.clone() }
    }
}

#[derive(Debug, Deserialize)]
struct WireMessageOwned {
    #[serde(default)]
    content: String,
}
