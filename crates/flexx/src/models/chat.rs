use serde::{Deserialize, Serialize};
use serde_json::json;

use super::message::{ChatMessage, ContentPart, MessageContent};
use crate::errors::FieldError;
use crate::image_utils::is_valid_image;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    #[default]
    Low,
    Medium,
    High,
}

/// Sampling parameters a client may tune per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            reasoning_effort: ReasoningEffort::default(),
        }
    }
}

fn default_temperature() -> f64 {
    1.0
}

fn default_top_p() -> f64 {
    0.8
}

/// Optional provider capability requested by the client
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Search,
    UrlContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub settings: ChatSettings,
    #[serde(default)]
    pub command: Option<Command>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            settings: ChatSettings::default(),
            command: None,
        }
    }

    pub fn with_settings(mut self, settings: ChatSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_command(mut self, command: Command) -> Self {
        self.command = Some(command);
        self
    }

    /// Check the constraints serde can't express, collecting every violation
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.messages.is_empty() {
            errors.push(FieldError::new(
                vec![json!("body"), json!("messages")],
                "List should have at least 1 item",
                "too_short",
            ));
        }

        check_range(
            &mut errors,
            "temperature",
            self.settings.temperature,
            0.0,
            2.0,
        );
        check_range(&mut errors, "top_p", self.settings.top_p, 0.0, 1.0);

        for (i, message) in self.messages.iter().enumerate() {
            let MessageContent::Parts(parts) = &message.content else {
                continue;
            };
            for (j, part) in parts.iter().enumerate() {
                let ContentPart::ImageUrl { image_url } = part else {
                    continue;
                };
                let loc = vec![
                    json!("body"),
                    json!("messages"),
                    json!(i),
                    json!("content"),
                    json!(j),
                    json!("image_url"),
                    json!("url"),
                ];
                if image_url.url.is_empty() {
                    errors.push(FieldError::new(loc, "Image url must not be empty", "missing"));
                } else if !is_remote_url(&image_url.url) && !is_valid_image(&image_url.url) {
                    errors.push(FieldError::new(
                        loc,
                        "Image data is not a valid base64 encoded image",
                        "value_error",
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn check_range(errors: &mut Vec<FieldError>, field: &str, value: f64, min: f64, max: f64) {
    if value.is_finite() && (min..=max).contains(&value) {
        return;
    }
    errors.push(FieldError::new(
        vec![json!("body"), json!("settings"), json!(field)],
        format!("Input should be between {} and {}", min, max),
        "value_error",
    ));
}

/// Whether an image url points at a remote resource rather than carrying inline data
pub fn is_remote_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// The full answer of a non streaming chat request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    pub fn error<S: Into<String>>(error: S) -> Self {
        Self {
            content: String::new(),
            reasoning_content: None,
            error: Some(error.into()),
        }
    }
}

/// One server-sent event of a streamed chat response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl StreamResponse {
    pub fn delta(content: Option<String>, reasoning_content: Option<String>) -> Self {
        Self {
            content,
            reasoning_content,
            ..Default::default()
        }
    }

    pub fn finished() -> Self {
        Self {
            finished: true,
            ..Default::default()
        }
    }

    pub fn error<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            finished: true,
            ..Default::default()
        }
    }
}
