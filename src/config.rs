use secrecy::{ExposeSecret, SecretBox};
use std::env;
use strum::{Display, EnumString};
use thiserror::Error;

/// Default credential endpoint of the streaming service.
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://api.heygen.com/v1/streaming.create_token";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key: {0}")]
    InvalidKey(String),
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// API credentials and endpoints, loaded from the environment
#[derive(Debug)]
pub struct ApiConfig {
    api_key: SecretBox<String>,
    pub token_endpoint: String,
    pub session_endpoint: String,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        let key = env::var("AVATAR_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("AVATAR_API_KEY".to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKey("API key cannot be empty".to_string()));
        }

        let token_endpoint = env::var("AVATAR_TOKEN_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_TOKEN_ENDPOINT.to_string());
        let session_endpoint = env::var("AVATAR_SESSION_ENDPOINT")
            .unwrap_or_else(|_| "wss://api.heygen.com/v1/ws/streaming.chat".to_string());

        Ok(Self {
            api_key: SecretBox::new(Box::new(key)),
            token_endpoint,
            session_endpoint,
        })
    }

    /// Get the API key (use only when making API calls)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Rendering quality requested from the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

/// Languages the service can speak. The set is closed: personas are
/// provisioned per language, so arbitrary BCP-47 codes are rejected up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum Language {
    #[strum(serialize = "en")]
    English,
    #[strum(serialize = "es")]
    Spanish,
    #[strum(serialize = "fr")]
    French,
    #[strum(serialize = "de")]
    German,
    #[strum(serialize = "it")]
    Italian,
    #[strum(serialize = "pt")]
    Portuguese,
    #[strum(serialize = "nl")]
    Dutch,
    #[strum(serialize = "sv")]
    Swedish,
    #[strum(serialize = "no")]
    Norwegian,
    #[strum(serialize = "da")]
    Danish,
    #[strum(serialize = "fi")]
    Finnish,
    #[strum(serialize = "pl")]
    Polish,
    #[strum(serialize = "ru")]
    Russian,
    #[strum(serialize = "ja")]
    Japanese,
    #[strum(serialize = "ko")]
    Korean,
    #[strum(serialize = "zh")]
    Chinese,
    #[strum(serialize = "hi")]
    Hindi,
    #[strum(serialize = "ar")]
    Arabic,
    #[strum(serialize = "tr")]
    Turkish,
    #[strum(serialize = "th")]
    Thai,
    #[strum(serialize = "vi")]
    Vietnamese,
    #[strum(serialize = "id")]
    Indonesian,
    #[strum(serialize = "ms")]
    Malay,
    #[strum(serialize = "tl")]
    Filipino,
}

/// Configuration surface for starting an avatar session
#[derive(Debug, Clone)]
pub struct AvatarSettings {
    pub quality: Quality,
    pub avatar_name: String,
    pub knowledge_base_id: String,
    pub protocol_version: String,
    pub language: Language,
    /// Optional line spoken verbatim shortly after the session starts
    pub greeting: Option<String>,
}

impl Default for AvatarSettings {
    fn default() -> Self {
        Self {
            quality: Quality::High,
            avatar_name: "Thaddeus_ProfessionalLook_public".to_string(),
            knowledge_base_id: "2d6a4ab546da4b10885a3cc2658198f8".to_string(),
            protocol_version: "v2".to_string(),
            language: Language::English,
            greeting: None,
        }
    }
}
