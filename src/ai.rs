use log::{debug, error};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// --- Errors ---

/// Failures talking to the model. Messages are shown to the coach as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    #[error("No API key configured. Please add your Claude API key in settings.")]
    MissingApiKey,
    #[error("Failed to decrypt API key. Please reconfigure your Claude API key in settings.")]
    UndecryptableApiKey,
    #[error("Invalid API key. Please check your Claude API key in settings.")]
    InvalidApiKey,
    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,
    #[error("Invalid request. Please check your settings and try again.")]
    BadRequest,
    #[error("API error: {0}")]
    Status(u16),
    #[error("Failed to connect to Claude API. Please check your internet connection.")]
    Connection,
    #[error("AI request worker stopped unexpectedly")]
    Worker,
}

impl AiError {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => AiError::InvalidApiKey,
            429 => AiError::RateLimited,
            400 => AiError::BadRequest,
            other => AiError::Status(other),
        }
    }
}

// --- Provider trait ---

pub trait AIProvider: Send + Sync {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError>;
    fn model_name(&self) -> &str;
}

// --- Model catalog ---

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub model_id: &'static str,
    pub label: &'static str,
    pub short_name: &'static str,
}

pub const CLAUDE_MODELS: &[ModelSpec] = &[
    ModelSpec {
        model_id: "claude-opus-4-20250514",
        label: "Claude Opus 4 (Latest)",
        short_name: "opus-4",
    },
    ModelSpec {
        model_id: "claude-sonnet-4-20250514",
        label: "Claude Sonnet 4",
        short_name: "sonnet-4",
    },
    ModelSpec {
        model_id: "claude-3-7-sonnet-20250224",
        label: "Claude 3.7 Sonnet",
        short_name: "sonnet-3.7",
    },
    ModelSpec {
        model_id: "claude-3-5-sonnet-20241022",
        label: "Claude 3.5 Sonnet",
        short_name: "sonnet-3.5",
    },
    ModelSpec {
        model_id: "claude-3-5-haiku-20241022",
        label: "Claude 3.5 Haiku",
        short_name: "haiku-3.5",
    },
];

pub const DEFAULT_CLAUDE_MODEL: &str = "claude-opus-4-20250514";

/// Accepts a full model id or its short name.
pub fn resolve_model(name: &str) -> Result<&'static ModelSpec, String> {
    let name = name.trim();
    CLAUDE_MODELS
        .iter()
        .find(|m| m.model_id == name || m.short_name == name)
        .ok_or_else(|| {
            let available: Vec<&str> = CLAUDE_MODELS.iter().map(|m| m.short_name).collect();
            format!(
                "Unknown model '{}'. Available: {}",
                name,
                available.join(", ")
            )
        })
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const MAX_TOKENS: u32 = 4000;

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model_id: String) -> Self {
        Self {
            api_key,
            model_id,
            endpoint: ANTHROPIC_API_URL.to_string(),
            client: reqwest::blocking::Client::new(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, AiError> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        debug!(
            "Calling {} with {} prompt chars",
            self.model_id,
            prompt.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| {
                error!("Error calling Claude API: {}", e);
                AiError::Connection
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().unwrap_or_default();
            error!("Claude API error ({}): {}", status, error_text);
            return Err(AiError::from_status(status));
        }

        let api_response: AnthropicResponse = response.json().map_err(|e| {
            error!("Failed to parse Claude API response: {}", e);
            AiError::Connection
        })?;

        // A response without text blocks is treated as empty output.
        Ok(api_response
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

/// Build the provider for a coach's decrypted key and chosen model.
pub fn connect(api_key: &str, model: &str) -> Box<dyn AIProvider> {
    Box::new(AnthropicProvider::new(api_key.to_string(), model.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_by_id_and_short_name() {
        let model = resolve_model("claude-sonnet-4-20250514").unwrap();
        assert_eq!(model.short_name, "sonnet-4");

        let model = resolve_model("haiku-3.5").unwrap();
        assert_eq!(model.model_id, "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_resolve_model_unknown() {
        let err = resolve_model("gpt-4o").unwrap_err();
        assert!(err.contains("Unknown model 'gpt-4o'"));
        assert!(err.contains("opus-4"));
    }

    #[test]
    fn test_default_model_is_in_catalog() {
        assert!(resolve_model(DEFAULT_CLAUDE_MODEL).is_ok());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AiError::from_status(401), AiError::InvalidApiKey);
        assert_eq!(AiError::from_status(429), AiError::RateLimited);
        assert_eq!(AiError::from_status(400), AiError::BadRequest);
        assert_eq!(AiError::from_status(529).to_string(), "API error: 529");
    }

    #[test]
    fn test_unreachable_endpoint_is_connection_error() {
        let provider = AnthropicProvider::new("key".to_string(), DEFAULT_CLAUDE_MODEL.to_string())
            .with_endpoint("http://127.0.0.1:9/v1/messages");
        assert_eq!(provider.complete("hi", 10), Err(AiError::Connection));
        assert_eq!(provider.model_name(), DEFAULT_CLAUDE_MODEL);
    }

    #[test]
    fn test_response_parsing_takes_first_block() {
        let body = r#"{"content":[{"type":"text","text":"first"},{"type":"text","text":"second"}]}"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content[0].text, "first");

        let empty: AnthropicResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.content.is_empty());
    }
}
