use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use mbf_core::{
    domain::{BotContext, InboundEvent, InboundKind, UserId},
    notify::{NotificationQueue, NotifyChannel},
    ports::{TransportClient, UpdateHandler},
    utils::truncate_text,
    Result,
};

const PREVIEW_LEN: usize = 200;

/// Update boundary that reports user activity to the operator channel and
/// then hands the event to the business handler, if one is plugged in.
pub struct ActivityHandler {
    queue: Arc<NotificationQueue>,
    inner: Option<Arc<dyn UpdateHandler>>,
}

impl ActivityHandler {
    pub fn new(queue: Arc<NotificationQueue>) -> Self {
        Self { queue, inner: None }
    }

    pub fn with_inner(mut self, inner: Arc<dyn UpdateHandler>) -> Self {
        self.inner = Some(inner);
        self
    }
}

#[async_trait]
impl UpdateHandler for ActivityHandler {
    async fn handle(
        &self,
        ctx: &BotContext,
        client: Arc<dyn TransportClient>,
        event: InboundEvent,
        cancel: CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Ok(());
        }

        if let Some(text) = activity_line(ctx, &event.kind) {
            self.queue.try_enqueue(NotifyChannel::Activity, text);
        }

        match &self.inner {
            Some(inner) => inner.handle(ctx, client, event, cancel).await,
            None => Ok(()),
        }
    }
}

fn activity_line(ctx: &BotContext, kind: &InboundKind) -> Option<String> {
    let bot = match &ctx.username {
        Some(name) => format!("@{name}"),
        None => ctx.key.to_string(),
    };

    match kind {
        InboundKind::Message {
            from,
            username,
            text,
            ..
        } => {
            let who = who(*from, username.as_deref());
            let body = text
                .as_deref()
                .map(|t| truncate_text(t, PREVIEW_LEN))
                .unwrap_or_else(|| "[non-text message]".to_string());
            Some(format!("💬 {bot} · {who}\n{body}"))
        }
        InboundKind::Callback {
            from,
            username,
            data,
            ..
        } => {
            let who = who(Some(*from), username.as_deref());
            let data = data.as_deref().unwrap_or("-");
            Some(format!("🔘 {bot} · {who} pressed {data}"))
        }
        InboundKind::Other => None,
    }
}

fn who(id: Option<UserId>, username: Option<&str>) -> String {
    match (username, id) {
        (Some(name), Some(id)) => format!("@{name} ({})", id.0),
        (Some(name), None) => format!("@{name}"),
        (None, Some(id)) => id.0.to_string(),
        (None, None) => "unknown".to_string(),
    }
}
