use crate::error::ConfigError;
use config::{Config, Environment};
use flexx::{
    chat_service::DEFAULT_MODEL, prompt_template::PromptSettings, providers::configs::GEMINI_HOST,
};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const API_KEY_ENV_VAR: &str = "GOOGLE_API_KEY";
pub const MODEL_ENV_VAR: &str = "MODEL";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding the browser client, served for paths outside the API
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_gemini_host")]
    pub host: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub prompt: PromptSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    /// The API key, present once `new` has succeeded
    pub fn api_key(&self) -> &str {
        self.provider.api_key.as_deref().unwrap_or_default()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("server.static_dir", "static")?
            // Provider defaults
            .set_default("provider.host", default_gemini_host())?
            .set_default("provider.model", default_model())?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("FLEXX")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            // The provider credentials keep their conventional unprefixed names
            .set_override_option("provider.api_key", env::var(API_KEY_ENV_VAR).ok())?
            .set_override_option("provider.model", env::var(MODEL_ENV_VAR).ok())?
            .build()?;

        let settings: Self = config.try_deserialize().map_err(|err| {
            tracing::debug!("Configuration error: {:?}", &err);
            ConfigError::Other(err)
        })?;

        if settings
            .provider
            .api_key
            .as_deref()
            .map_or(true, |key| key.trim().is_empty())
        {
            return Err(ConfigError::MissingEnvVar {
                env_var: API_KEY_ENV_VAR.to_string(),
            });
        }

        Ok(settings)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_gemini_host() -> String {
    GEMINI_HOST.to_string()
}
