use async_trait::async_trait;
use teloxide::{prelude::*, RequestError};
use tokio::time::sleep;
use tracing::debug;

use mbf_core::{domain::ChatId, ports::NotificationSink, Error, Result};

/// Delivers notification batches as plain-text messages through one bot.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(token),
        }
    }

    async fn with_retry<T, Fut>(
        &self,
        chat_id: ChatId,
        mut op: impl FnMut() -> Fut,
    ) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(wait)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    let wait = wait.duration();
                    debug!(chat_id = chat_id.0, ?wait, "rate limited; retrying once");
                    sleep(wait).await;
                }
                Err(e) => {
                    return Err(Error::Delivery {
                        chat_id,
                        reason: e.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.with_retry(chat_id, || {
            self.bot
                .send_message(teloxide::types::ChatId(chat_id.0), text.to_string())
        })
        .await?;
        Ok(())
    }
}
