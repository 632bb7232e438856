use thiserror::Error;

pub type Result<T> = std::result::Result<T, KioskError>;

#[derive(Error, Debug)]
pub enum KioskError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Token error: {0}")]
    Token(#[from] crate::token::TokenError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("Microphone error: {0}")]
    Mic(#[from] crate::mic::MicError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
