use serde::{Deserialize, Serialize};

pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiProviderConfig {
    pub host: String,
}

impl Default for GeminiProviderConfig {
    fn default() -> Self {
        Self {
            host: GEMINI_HOST.to_string(),
        }
    }
}
