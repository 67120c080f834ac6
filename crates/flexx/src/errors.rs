use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("GOOGLE_API_KEY environment variable is required")]
    MissingApiKey,

    #[error("Failed to render system prompt: {0}")]
    Prompt(String),
}

/// A single constraint violation found while validating a request body.
///
/// Serializes to the `{loc, msg, type}` shape clients already parse for 422 responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub loc: Vec<serde_json::Value>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    pub fn new<S: Into<String>>(loc: Vec<serde_json::Value>, msg: S, kind: &str) -> Self {
        Self {
            loc,
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}
