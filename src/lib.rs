pub mod compositor;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod mic;
pub mod session;
pub mod token;
pub mod transcript;
pub mod utterance;

pub use error::{KioskError, Result};
