//! The language-model capability.
//!
//! A [`LanguageModel`] takes a conversation (text and images) plus a system
//! prompt and returns the reply text. Providers are selected by name through
//! a [`ModelFactory`] so the unit never depends on a concrete vendor.

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Longest provider error body carried into an error message
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Unknown LLM provider: \"{0}\". Supported: anthropic, openai")]
    UnknownProvider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unreadable response: {reason}")]
    InvalidResponse {
        provider: &'static str,
        reason: String,
    },
}

impl LlmError {
    pub(crate) fn api(provider: &'static str, status: u16, body: &str) -> Self {
        LlmError::Api {
            provider,
            status,
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// Base64-encoded image
    Image { media_type: String, data: String },
}

impl ContentPart {
    pub fn png(data: String) -> Self {
        ContentPart::Image {
            media_type: "image/png".to_string(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn user(content: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentPart::Text(text.into())])
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text(text.into())],
        }
    }

    /// All text parts joined, images skipped
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_image(&self) -> bool {
        self.content
            .iter()
            .any(|part| matches!(part, ContentPart::Image { .. }))
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &str;

    async fn chat(&self, messages: &[ChatMessage], system_prompt: &str) -> Result<String, LlmError>;
}

/// Builds a model from the provider name and key carried in a run config
pub trait ModelFactory: Send + Sync {
    fn create(
        &self,
        provider: &str,
        api_key: &str,
        model: Option<&str>,
    ) -> Result<Box<dyn LanguageModel>, LlmError>;
}

/// Provider endpoints and request limits
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub anthropic_base_url: String,
    pub openai_base_url: String,
    pub request_timeout: Duration,
    pub max_tokens: u32,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            openai_base_url: "https://api.openai.com".to_string(),
            request_timeout: Duration::from_secs(120),
            max_tokens: 4096,
        }
    }
}

impl ModelSettings {
    /// Defaults overridden by `ANTHROPIC_BASE_URL` and `OPENAI_BASE_URL`
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            if !url.trim().is_empty() {
                settings.anthropic_base_url = url.trim().to_string();
            }
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            if !url.trim().is_empty() {
                settings.openai_base_url = url.trim().to_string();
            }
        }
        settings
    }
}

/// Select a provider by name: `anthropic`/`claude` or `openai`/`gpt`
pub fn create_provider(
    provider: &str,
    api_key: &str,
    model: Option<&str>,
    settings: &ModelSettings,
) -> Result<Box<dyn LanguageModel>, LlmError> {
    match provider.trim().to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => Ok(Box::new(AnthropicProvider::new(api_key, model, settings)?)),
        "openai" | "gpt" => Ok(Box::new(OpenAiProvider::new(api_key, model, settings)?)),
        _ => Err(LlmError::UnknownProvider(provider.to_string())),
    }
}

/// The factory used outside tests: real HTTP providers
#[derive(Debug, Clone, Default)]
pub struct HttpModelFactory {
    settings: ModelSettings,
}

impl HttpModelFactory {
    pub fn new(settings: ModelSettings) -> Self {
        Self { settings }
    }
}

impl ModelFactory for HttpModelFactory {
    fn create(
        &self,
        provider: &str,
        api_key: &str,
        model: Option<&str>,
    ) -> Result<Box<dyn LanguageModel>, LlmError> {
        create_provider(provider, api_key, model, &self.settings)
    }
}

pub(crate) fn http_client(settings: &ModelSettings) -> Result<reqwest::Client, LlmError> {
    Ok(reqwest::Client::builder()
        .timeout(settings.request_timeout)
        .build()?)
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_selection() {
        let settings = ModelSettings::default();

        let model = create_provider("Claude", "k", None, &settings).unwrap();
        assert_eq!(model.name(), "anthropic");
        let model = create_provider("gpt", "k", Some("gpt-4o-mini"), &settings).unwrap();
        assert_eq!(model.name(), "openai");

        let err = create_provider("gemini", "k", None, &settings).err().unwrap();
        assert!(matches!(err, LlmError::UnknownProvider(ref name) if name == "gemini"));
        assert!(err.to_string().contains("Supported: anthropic, openai"));
    }

    #[test]
    fn test_api_error_body_is_capped() {
        let err = LlmError::api("openai", 500, &"x".repeat(2000));
        match err {
            LlmError::Api { body, status, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), MAX_ERROR_BODY);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_message_text() {
        let msg = ChatMessage::user(vec![
            ContentPart::png("AAAA".to_string()),
            ContentPart::Text("first".to_string()),
            ContentPart::Text("second".to_string()),
        ]);
        assert_eq!(msg.text(), "first\nsecond");
        assert!(msg.has_image());
        assert!(!ChatMessage::assistant_text("hi").has_image());
    }

    #[test]
    fn test_endpoint_join() {
        assert_eq!(
            endpoint("http://127.0.0.1:9000/", "/v1/messages"),
            "http://127.0.0.1:9000/v1/messages"
        );
    }
}
