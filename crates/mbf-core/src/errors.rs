use crate::domain::{BotKey, ChatId};

/// Core error type for the bot fleet.
///
/// Adapter crates should map their specific errors into this type so the
/// runtime can log and report failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to start {key}: {reason}")]
    StartFailed { key: BotKey, reason: String },

    #[error("runner for {0} is stopped")]
    RunnerStopped(BotKey),

    #[error("delivery to chat {} failed: {reason}", chat_id.0)]
    Delivery { chat_id: ChatId, reason: String },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
