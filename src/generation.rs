//! Hosted language model backends.
//!
//! [`ChatCompletionsProvider`] speaks the OpenAI-compatible
//! `POST /chat/completions` protocol, which covers both Groq (the default,
//! `gemma2-9b-it`) and OpenAI. [`DisabledGenerator`] fails every call.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::GenerationConfig;
use crate::error::{RagError, Result};
use crate::http;

const GROQ_BASE: &str = "https://api.groq.com/openai/v1";
const OPENAI_BASE: &str = "https://api.openai.com/v1";

/// A composed prompt: system instructions (with the retrieved context
/// already substituted) plus the user's question.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Return the model's answer text for `prompt`.
    async fn generate(&self, prompt: &Prompt) -> Result<String>;
}

/// Fails every call; used when `generation.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &Prompt) -> Result<String> {
        Err(RagError::GenerationError(
            "generation provider is disabled; set [generation] provider in config".to_string(),
        ))
    }
}

/// OpenAI-compatible chat completions backend.
pub struct ChatCompletionsProvider {
    name: &'static str,
    key_vars: &'static [&'static str],
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    timeout_secs: u64,
}

impl ChatCompletionsProvider {
    /// Groq, reading `GROQ_API_KEY`.
    pub fn groq(config: &GenerationConfig) -> Self {
        Self::with_backend("Groq", &["GROQ_API_KEY"], GROQ_BASE, config)
    }

    /// OpenAI, reading `OPENAI_API_KEY`.
    pub fn openai(config: &GenerationConfig) -> Self {
        Self::with_backend("OpenAI", &["OPENAI_API_KEY"], OPENAI_BASE, config)
    }

    fn with_backend(
        name: &'static str,
        key_vars: &'static [&'static str],
        default_base: &str,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            name,
            key_vars,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
        }
    }

    fn request_body(&self, prompt: &Prompt) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }
}

#[async_trait]
impl GenerationProvider for ChatCompletionsProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String> {
        let api_key = http::api_key(self.key_vars).map_err(RagError::GenerationError)?;
        let client = http::client(self.timeout_secs).map_err(RagError::GenerationError)?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        tracing::debug!(
            backend = self.name,
            model = %self.model,
            prompt_chars = prompt.system.len() + prompt.user.len(),
            "sending chat completion request"
        );

        let json = http::post_json(
            &client,
            &url,
            &api_key,
            &self.request_body(prompt),
            self.max_retries,
            self.name,
        )
        .await
        .map_err(RagError::GenerationError)?;

        parse_chat_response(&json)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_value(json.clone())
        .map_err(|e| RagError::GenerationError(format!("invalid chat response: {}", e)))?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| RagError::GenerationError("model returned no answer".to_string()))
}

/// Create the configured [`GenerationProvider`].
pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "groq" => Ok(Box::new(ChatCompletionsProvider::groq(config))),
        "openai" => Ok(Box::new(ChatCompletionsProvider::openai(config))),
        other => Err(RagError::Config(format!(
            "unknown generation provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let provider = ChatCompletionsProvider::groq(&GenerationConfig::default());
        let body = provider.request_body(&Prompt {
            system: "Context: x".into(),
            user: "What is x?".into(),
        });
        assert_eq!(body["model"], "gemma2-9b-it");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "What is x?");
        assert_eq!(body["temperature"], 0.0);
    }

    #[test]
    fn test_base_url_override() {
        let config = GenerationConfig {
            base_url: Some("http://localhost:11434/v1/".into()),
            ..Default::default()
        };
        let provider = ChatCompletionsProvider::openai(&config);
        assert_eq!(provider.base_url, "http://localhost:11434/v1/");
    }

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": " B scored 20. " } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "B scored 20.");
    }

    #[test]
    fn test_parse_chat_response_without_choices() {
        let json = serde_json::json!({ "choices": [] });
        assert!(matches!(
            parse_chat_response(&json),
            Err(RagError::GenerationError(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_generator_errors() {
        let prompt = Prompt {
            system: String::new(),
            user: "q".into(),
        };
        assert!(matches!(
            DisabledGenerator.generate(&prompt).await,
            Err(RagError::GenerationError(_))
        ));
    }

    #[test]
    fn test_create_generator() {
        let g = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(g.model_name(), "gemma2-9b-it");
    }
}
