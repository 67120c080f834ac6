use anyhow::Result;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::ConfigError;
use crate::image_utils::ensure_data_url;
use crate::models::chat::{is_remote_url, ChatRequest, ChatResponse, Command, StreamResponse};
use crate::models::message::{ContentPart, ImageUrl, MessageContent};
use crate::prompt_template::{render_system_prompt, PromptSettings};
use crate::providers::base::{CompletionRequest, Provider};
use crate::providers::utils::GEMINI_MODEL_PREFIX;

/// Model used when `MODEL` is not configured
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Relays chat requests to the model provider
///
/// Holds only configuration fixed at construction, so a single instance can serve
/// any number of concurrent requests.
pub struct ChatService {
    model: String,
    api_key: String,
    system_prompt: String,
    provider: Arc<dyn Provider>,
}

impl ChatService {
    /// Create the service, failing when no API key is configured
    ///
    /// `model` may be given with or without the `gemini/` provider prefix.
    pub fn new(
        model: &str,
        api_key: &str,
        prompt: &PromptSettings,
        provider: Arc<dyn Provider>,
    ) -> Result<Self, ConfigError> {
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        let system_prompt =
            render_system_prompt(prompt).map_err(|e| ConfigError::Prompt(format!("{:?}", e)))?;

        let model = if model.starts_with(GEMINI_MODEL_PREFIX) {
            model.to_string()
        } else {
            format!("{}{}", GEMINI_MODEL_PREFIX, model)
        };

        Ok(Self {
            model,
            api_key: api_key.to_string(),
            system_prompt,
            provider,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Build the provider messages: our system instruction first, then the
    /// conversation without any client supplied system messages
    pub fn build_messages(&self, request: &ChatRequest) -> Result<Vec<Value>> {
        let mut messages = vec![json!({
            "role": "system",
            "content": self.system_prompt,
        })];

        for message in &request.messages {
            if message.is_system() {
                continue;
            }

            let content = match &message.content {
                MessageContent::Text(text) => json!(text),
                MessageContent::Parts(parts) => {
                    let converted = parts
                        .iter()
                        .map(|part| serde_json::to_value(normalize_part(part)))
                        .collect::<Result<Vec<_>, _>>()?;
                    json!(converted)
                }
            };

            messages.push(json!({
                "role": message.role,
                "content": content,
            }));
        }

        Ok(messages)
    }

    /// Provider native tools enabled by the request command
    pub fn select_tools(command: Option<Command>) -> Vec<Value> {
        match command {
            Some(Command::Search) => vec![json!({"googleSearch": {}})],
            Some(Command::UrlContext) => vec![json!({"urlContext": {}})],
            None => vec![],
        }
    }

    fn completion_request(&self, request: &ChatRequest) -> Result<CompletionRequest> {
        Ok(CompletionRequest {
            model: self.model.clone(),
            messages: self.build_messages(request)?,
            tools: Self::select_tools(request.command),
            temperature: Some(request.settings.temperature),
            top_p: Some(request.settings.top_p),
            reasoning_effort: Some(request.settings.reasoning_effort),
            api_key: self.api_key.clone(),
        })
    }

    /// Answer a chat request in one piece
    ///
    /// Provider failures are reported in the response's `error` field. Only failures
    /// while preparing the request are returned as `Err`.
    pub async fn process_chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let completion_request = self.completion_request(request)?;
        tracing::debug!(
            messages = completion_request.messages.len(),
            tools = completion_request.tools.len(),
            "Processing chat request"
        );

        match self.provider.complete(&completion_request).await {
            Ok(completion) => Ok(ChatResponse {
                content: completion.content.unwrap_or_default(),
                reasoning_content: completion.reasoning_content,
                error: None,
            }),
            Err(e) => {
                tracing::warn!("Chat completion failed: {}", e);
                Ok(ChatResponse::error(e.to_string()))
            }
        }
    }

    /// Stream the answer to a chat request
    ///
    /// The returned stream yields one event per non-empty delta. A provider failure,
    /// whether starting the call or mid-stream, yields a single error event with
    /// `finished` set and ends the stream. A clean end of the provider stream ends
    /// this stream without a terminal event.
    pub fn stream_chat(&self, request: &ChatRequest) -> Result<BoxStream<'static, StreamResponse>> {
        let completion_request = self.completion_request(request)?;
        let provider = Arc::clone(&self.provider);
        tracing::debug!(
            messages = completion_request.messages.len(),
            tools = completion_request.tools.len(),
            "Streaming chat request"
        );

        let stream = async_stream::stream! {
            let mut deltas = match provider.stream(&completion_request).await {
                Ok(deltas) => deltas,
                Err(e) => {
                    tracing::warn!("Failed to start chat stream: {}", e);
                    yield StreamResponse::error(e.to_string());
                    return;
                }
            };

            let mut forwarded = 0usize;
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(delta) => {
                        if delta.is_empty() {
                            continue;
                        }
                        forwarded += 1;
                        yield StreamResponse::delta(
                            delta.content.filter(|s| !s.is_empty()),
                            delta.reasoning_content.filter(|s| !s.is_empty()),
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Chat stream failed after {} chunks: {}", forwarded, e);
                        yield StreamResponse::error(e.to_string());
                        return;
                    }
                }
            }
            tracing::debug!("Chat stream finished after {} chunks", forwarded);
        };

        Ok(Box::pin(stream))
    }
}

/// Inline images sent as bare base64 get a data url prefix, everything else is kept
fn normalize_part(part: &ContentPart) -> ContentPart {
    match part {
        ContentPart::ImageUrl { image_url }
            if !is_remote_url(&image_url.url) && !image_url.url.starts_with("data:") =>
        {
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: ensure_data_url(&image_url.url),
                    detail: image_url.detail.clone(),
                },
            }
        }
        other => other.clone(),
    }
}
