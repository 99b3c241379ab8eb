//! Anthropic Messages API

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{endpoint, http_client, ChatMessage, ContentPart, LanguageModel, LlmError, ModelSettings};

const PROVIDER: &str = "anthropic";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<WireContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireContent<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: Option<&str>, settings: &ModelSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(settings)?,
            url: endpoint(&settings.anthropic_base_url, "/v1/messages"),
            api_key: api_key.to_string(),
            model: model
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_MODEL)
                .to_string(),
            max_tokens: settings.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// The API requires alternating roles, so consecutive messages from the
/// same role are merged into one.
fn to_wire(messages: &[ChatMessage]) -> Vec<WireMessage<'_>> {
    let mut wire: Vec<WireMessage<'_>> = Vec::with_capacity(messages.len());
    for message in messages {
        let role = message.role.as_str();
        let content = message.content.iter().map(|part| match part {
            ContentPart::Text(text) => WireContent::Text { text },
            ContentPart::Image { media_type, data } => WireContent::Image {
                source: ImageSource {
                    kind: "base64",
                    media_type,
                    data,
                },
            },
        });
        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(content),
            _ => wire.push(WireMessage {
                role,
                content: content.collect(),
            }),
        }
    }
    wire
}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn chat(&self, messages: &[ChatMessage], system_prompt: &str) -> Result<String, LlmError> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: system_prompt,
            messages: to_wire(messages),
        };

        tracing::debug!("[Anthropic] Request: model={} messages={}", self.model, request.messages.len());

        let response = self
            .client
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::api(PROVIDER, status.as_u16(), &body));
        }

        let body: MessagesResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER,
            reason: e.to_string(),
        })?;

        Ok(body
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}
