//! OpenAI Chat Completions API

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{endpoint, http_client, ChatMessage, ContentPart, LanguageModel, LlmError, ModelSettings, Role};

const PROVIDER: &str = "openai";
const DEFAULT_MODEL: &str = "gpt-4o";

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: Option<&str>, settings: &ModelSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client(settings)?,
            url: endpoint(&settings.openai_base_url, "/v1/chat/completions"),
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

/// System prompt first, then user turns as content arrays (images become
/// data URLs) and assistant turns as plain text.
fn to_wire(messages: &[ChatMessage], system_prompt: &str) -> Vec<Value> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        wire.push(json!({ "role": "system", "content": system_prompt }));
    }
    for message in messages {
        match message.role {
            Role::Assistant => {
                wire.push(json!({ "role": "assistant", "content": message.text() }));
            }
            Role::User => {
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                        ContentPart::Image { media_type, data } => json!({
                            "type": "image_url",
                            "image_url": { "url": format!("data:{};base64,{}", media_type, data) }
                        }),
                    })
                    .collect();
                wire.push(json!({ "role": "user", "content": parts }));
            }
        }
    }
    wire
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn chat(&self, messages: &[ChatMessage], system_prompt: &str) -> Result<String, LlmError> {
        let request = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": to_wire(messages, system_prompt),
        });

        tracing::debug!("[OpenAI] Request: model={} messages={}", self.model, messages.len());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::api(PROVIDER, status.as_u16(), &body));
        }

        let body: CompletionResponse = response.json().await.map_err(|e| LlmError::InvalidResponse {
            provider: PROVIDER,
            reason: e.to_string(),
        })?;

        // A missing message body is an empty reply, left to the parser to reject
        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}
