use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tera::{Context, Error as TeraError, Tera};

/// The bundled system instruction, with `language`, `subject` and `words_limit` placeholders
pub const SYSTEM_PROMPT_TEMPLATE: &str = include_str!("prompts/system.md");

/// Deployment level parameters for the system instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSettings {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    #[serde(default = "default_words_limit")]
    pub words_limit: u32,
    /// Render this file instead of the bundled template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_file: Option<PathBuf>,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            language: default_language(),
            subject: default_subject(),
            words_limit: default_words_limit(),
            template_file: None,
        }
    }
}

fn default_language() -> String {
    "English".to_string()
}

fn default_subject() -> String {
    "General".to_string()
}

fn default_words_limit() -> u32 {
    100
}

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

pub fn load_prompt_file<T: Serialize>(
    template_file: impl Into<PathBuf>,
    context_data: &T,
) -> Result<String, TeraError> {
    let template_path = template_file.into();
    let template_content = fs::read_to_string(&template_path)
        .map_err(|e| TeraError::chain("Failed to read template file", e))?;
    load_prompt(&template_content, context_data)
}

/// Render the system instruction for the given settings
pub fn render_system_prompt(settings: &PromptSettings) -> Result<String, TeraError> {
    match &settings.template_file {
        Some(path) => load_prompt_file(path.clone(), settings),
        None => load_prompt(SYSTEM_PROMPT_TEMPLATE, settings),
    }
}
