//! LLM request/response types
//!
//! Common types for chat-completion backends, plus the request/response
//! records persisted for every call made through the adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Chat role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Ask the provider for a valid-JSON response. This is the plain JSON
    /// directive, not grammar-constrained decoding.
    #[serde(default)]
    pub json_mode: bool,
    /// Model override; the adapter default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            max_tokens: None,
            temperature: Some(0.2),
            top_p: None,
            json_mode: false,
            model: None,
        }
    }
}

impl GenerateRequest {
    /// Create a new request with a system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            ..Default::default()
        }
    }

    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        self.messages.push(Message::user(content));
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Stable digest of the prompt content, recorded instead of the full
    /// prompt text.
    pub fn prompt_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for m in &self.messages {
            hasher.update(m.role.to_string().as_bytes());
            hasher.update(b"\x1f");
            hasher.update(m.content.as_bytes());
            hasher.update(b"\x1e");
        }
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
    Cancelled,
}

/// Token accounting for one call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub tokens_in: u64,
    pub tokens_out: u64,
}

/// LLM generation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub duration_ms: u64,
    pub finish_reason: FinishReason,
}

impl GenerateResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
            duration_ms: 0,
            finish_reason: FinishReason::Stop,
        }
    }
}

/// Request record written before dispatch, correlated with a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequestRecord {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub provider: String,
    pub model: String,
    pub prompt_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Response record written after completion or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponseRecord {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_text: Option<String>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates_messages() {
        let req = GenerateRequest::new("You extract claims.")
            .with_user_message("window text")
            .with_json_mode(true);
        assert_eq!(req.messages.len(), 2);
        assert!(req.json_mode);
        assert_eq!(req.messages[0].role, Role::System);
    }

    #[test]
    fn prompt_hash_is_stable_and_content_sensitive() {
        let a = GenerateRequest::new("s").with_user_message("u");
        let b = GenerateRequest::new("s").with_user_message("u");
        let c = GenerateRequest::new("s").with_user_message("different");
        assert_eq!(a.prompt_hash(), b.prompt_hash());
        assert_ne!(a.prompt_hash(), c.prompt_hash());
    }
}
