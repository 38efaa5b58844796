use std::{
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use teloxide::{
    prelude::*,
    types::{AllowedUpdate, Update, UpdateKind},
    ApiError, RequestError,
};
use tracing::debug;

use mbf_core::{
    domain::{BotDescriptor, ChatId, InboundEvent, InboundKind, UserId},
    ports::{TransportClient, TransportFactory},
    Error, Result,
};

/// Headroom on top of the long-poll timeout for the HTTP client.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

/// Opens one long-polling Bot API client per runner start.
#[derive(Clone, Debug)]
pub struct TelegramTransportFactory {
    poll_timeout: Duration,
}

impl TelegramTransportFactory {
    pub fn new(poll_timeout: Duration) -> Self {
        Self { poll_timeout }
    }
}

#[async_trait]
impl TransportFactory for TelegramTransportFactory {
    async fn create_client(&self, descriptor: &BotDescriptor) -> Result<Arc<dyn TransportClient>> {
        // The HTTP timeout must outlive the long-poll timeout, or the client
        // aborts requests Telegram is still holding open.
        let http = teloxide::net::default_reqwest_settings()
            .timeout(self.poll_timeout + HTTP_TIMEOUT_SLACK)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build http client: {e}")))?;
        let bot = Bot::with_client(descriptor.token.clone(), http);

        // Verifies the credential.
        let me = bot.get_me().await.map_err(map_err)?;
        // Long polling is refused while a webhook is set.
        bot.delete_webhook().await.map_err(map_err)?;

        debug!(bot = %descriptor.key, username = ?me.username, "telegram client connected");

        Ok(Arc::new(TelegramClient {
            bot,
            username: me.username.clone(),
            offset: AtomicI32::new(0),
            poll_timeout_secs: u32::try_from(self.poll_timeout.as_secs()).unwrap_or(u32::MAX),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Long-polling client for one bot token.
pub struct TelegramClient {
    bot: Bot,
    username: Option<String>,
    offset: AtomicI32,
    poll_timeout_secs: u32,
    closed: AtomicBool,
}

impl TelegramClient {
    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }
}

#[async_trait]
impl TransportClient for TelegramClient {
    fn username(&self) -> Option<String> {
        self.username.clone()
    }

    async fn fetch_updates(&self) -> Result<Vec<InboundEvent>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("client closed".to_string()));
        }

        let updates = self
            .bot
            .get_updates()
            .offset(self.offset.load(Ordering::SeqCst))
            .timeout(self.poll_timeout_secs)
            .allowed_updates(vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery])
            .await
            .map_err(map_err)?;

        let mut events = Vec::with_capacity(updates.len());
        for update in updates {
            self.offset.store(update.id.as_offset(), Ordering::SeqCst);
            events.push(to_event(update));
        }
        Ok(events)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(username = ?self.username, "telegram client closed");
        }
    }
}

fn map_err(e: RequestError) -> Error {
    match e {
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => Error::Transport(
            "another instance is already polling with this token".to_string(),
        ),
        other => Error::Transport(format!("telegram error: {other}")),
    }
}

/// Map a Bot API update onto the transport-agnostic event model.
pub(crate) fn to_event(update: Update) -> InboundEvent {
    let update_id = i64::from(update.id.0);
    let kind = match update.kind {
        UpdateKind::Message(msg) => InboundKind::Message {
            chat_id: ChatId(msg.chat.id.0),
            from: msg.from.as_ref().map(|u| UserId(u.id.0 as i64)),
            username: msg.from.as_ref().and_then(|u| u.username.clone()),
            text: msg.text().map(str::to_string),
        },
        UpdateKind::CallbackQuery(q) => InboundKind::Callback {
            chat_id: q.message.as_ref().map(|m| ChatId(m.chat().id.0)),
            from: UserId(q.from.id.0 as i64),
            username: q.from.username.clone(),
            callback_id: q.id.to_string(),
            data: q.data.clone(),
        },
        _ => InboundKind::Other,
    };
    InboundEvent { update_id, kind }
}
