use anyhow::Result;
use flexx::{
    chat_service::ChatService,
    providers::{configs::GeminiProviderConfig, gemini::GeminiProvider},
};
use std::sync::Arc;

use crate::configuration::Settings;

/// Shared application state
///
/// The chat service only holds immutable configuration, so every request shares one instance.
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
}

impl AppState {
    pub fn new(chat_service: ChatService) -> Self {
        Self {
            chat_service: Arc::new(chat_service),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = GeminiProvider::new(GeminiProviderConfig {
            host: settings.provider.host.clone(),
        })?;
        let chat_service = ChatService::new(
            &settings.provider.model,
            settings.api_key(),
            &settings.prompt,
            Arc::new(provider),
        )?;

        tracing::info!(model = %chat_service.model(), "Chat service ready");
        Ok(Self::new(chat_service))
    }
}
