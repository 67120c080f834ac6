use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// One piece of a multi-part message, either text or an image reference
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url<S: Into<String>>(url: S) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
/// Message content, plain text for simple messages or a list of parts for mixed content
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        MessageContent::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        MessageContent::Text(text)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        MessageContent::Parts(parts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// A message in the conversation sent by the client
pub struct ChatMessage {
    /// Usually one of system, user or assistant, but not constrained
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn new<R: Into<String>, C: Into<MessageContent>>(role: R, content: C) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn system<C: Into<MessageContent>>(content: C) -> Self {
        Self::new("system", content)
    }

    pub fn user<C: Into<MessageContent>>(content: C) -> Self {
        Self::new("user", content)
    }

    pub fn assistant<C: Into<MessageContent>>(content: C) -> Self {
        Self::new("assistant", content)
    }

    pub fn is_system(&self) -> bool {
        self.role == "system"
    }
}
