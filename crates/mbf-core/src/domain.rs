use std::fmt;

use chrono::{DateTime, Utc};

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Identity of one bot in the fleet.
///
/// `Main` is the sentinel for the process-owned bot; every user-registered
/// mirror carries the opaque id assigned by the persistence layer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BotKey {
    Main,
    Mirror(String),
}

impl BotKey {
    pub fn mirror(id: impl Into<String>) -> Self {
        Self::Mirror(id.into())
    }

    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main)
    }
}

impl fmt::Display for BotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Mirror(id) => write!(f, "mirror:{id}"),
        }
    }
}

/// Snapshot of one bot record as seen by a reconciliation pass.
///
/// Owned and mutated by the persistence layer; the runtime only reads it.
/// Mirror records read by [`crate::source::FileMirrorSource`] convert into it.
#[derive(Clone, PartialEq, Eq)]
pub struct BotDescriptor {
    pub key: BotKey,
    pub owner: Option<UserId>,
    pub token: String,
    pub enabled: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl BotDescriptor {
    pub fn main(token: impl Into<String>, owner: Option<UserId>) -> Self {
        Self {
            key: BotKey::Main,
            owner,
            token: token.into(),
            enabled: true,
            last_seen: None,
            last_error: None,
        }
    }

    pub fn mirror(id: impl Into<String>, owner: UserId, token: impl Into<String>) -> Self {
        Self {
            key: BotKey::mirror(id),
            owner: Some(owner),
            token: token.into(),
            enabled: true,
            last_seen: None,
            last_error: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

// Tokens must never end up in logs.
impl fmt::Debug for BotDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotDescriptor")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .field("token", &"<redacted>")
            .field("enabled", &self.enabled)
            .field("last_seen", &self.last_seen)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Per-bot context handed to the update handler.
#[derive(Clone, Debug)]
pub struct BotContext {
    pub key: BotKey,
    pub owner: Option<UserId>,
    pub username: Option<String>,
}

/// Transport-agnostic inbound update.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub update_id: i64,
    pub kind: InboundKind,
}

#[derive(Clone, Debug)]
pub enum InboundKind {
    Message {
        chat_id: ChatId,
        from: Option<UserId>,
        username: Option<String>,
        text: Option<String>,
    },
    Callback {
        chat_id: Option<ChatId>,
        from: UserId,
        username: Option<String>,
        callback_id: String,
        data: Option<String>,
    },
    Other,
}
