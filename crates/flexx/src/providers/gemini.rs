use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

use super::base::{Completion, CompletionRequest, CompletionStream, Provider};
use super::configs::GeminiProviderConfig;
use super::utils::{
    build_gemini_payload, gemini_response_to_completion, model_name, parse_sse_line,
};

/// Talks to the Gemini REST API (`generateContent` and `streamGenerateContent`)
pub struct GeminiProvider {
    client: Client,
    config: GeminiProviderConfig,
}

impl GeminiProvider {
    pub fn new(config: GeminiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}",
            self.config.host.trim_end_matches('/'),
            model_name(model),
            method
        )
    }

    async fn post(&self, url: &str, api_key: &str, payload: &Value) -> Result<Response> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        // Gemini wraps failures as {"error": {"code", "message", "status"}}
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/error/message")?.as_str().map(String::from))
            .unwrap_or(body);
        Err(anyhow!("Gemini API error ({}): {}", status, message))
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let payload = build_gemini_payload(request)?;
        let url = self.url(&request.model, "generateContent");
        tracing::debug!(model = %request.model, "Sending generateContent request");

        let response = self.post(&url, &request.api_key, &payload).await?;
        let data: Value = response.json().await?;

        gemini_response_to_completion(&data)
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        let payload = build_gemini_payload(request)?;
        let url = self.url(&request.model, "streamGenerateContent?alt=sse");
        tracing::debug!(model = %request.model, "Sending streamGenerateContent request");

        let response = self.post(&url, &request.api_key, &payload).await?;
        let mut bytes = Box::pin(response.bytes_stream());

        // Events are newline separated, a network chunk may hold several lines or part of one
        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                match chunk {
                    Ok(chunk) => buffer.extend_from_slice(&chunk),
                    Err(e) => {
                        yield Err(anyhow!("Stream error: {}", e));
                        return;
                    }
                }

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if let Some(item) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                        let failed = item.is_err();
                        yield item;
                        if failed {
                            return;
                        }
                    }
                }
            }

            if let Some(item) = parse_sse_line(&String::from_utf8_lossy(&buffer)) {
                yield item;
            }
        };

        Ok(Box::pin(stream))
    }
}
