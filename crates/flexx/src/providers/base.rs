use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::chat::ReasoningEffort;

/// Everything a provider needs for a single completion call
///
/// Messages use the openai chat shape (`{role, content}`), tools are provider native
/// descriptors which are passed through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Value>,
    pub tools: Vec<Value>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub api_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
}

/// An incremental piece of a streamed completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
}

impl CompletionDelta {
    pub fn text<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            reasoning_content: None,
        }
    }

    pub fn reasoning<S: Into<String>>(reasoning: S) -> Self {
        Self {
            content: None,
            reasoning_content: Some(reasoning.into()),
        }
    }

    /// True when neither field carries any text
    pub fn is_empty(&self) -> bool {
        self.content.as_deref().unwrap_or_default().is_empty()
            && self.reasoning_content.as_deref().unwrap_or_default().is_empty()
    }
}

pub type CompletionStream = BoxStream<'static, Result<CompletionDelta>>;

/// Base trait for model providers
///
/// Calls are single attempt, errors are returned to the caller as is.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the full completion in one call
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Start a streaming completion, yielding deltas as the provider produces them
    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream>;
}
