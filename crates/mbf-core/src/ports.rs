//! Hexagonal ports.
//!
//! Persistence, the chat transport, business handlers and the notification
//! destination live behind these traits and are implemented in adapter crates.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{BotContext, BotDescriptor, BotKey, ChatId, InboundEvent},
    Error, Result,
};

/// Source of truth for which mirror bots should be running.
#[async_trait]
pub trait DesiredStateSource: Send + Sync {
    /// Read-only; polled once per reconciliation tick.
    async fn list_enabled(&self) -> Result<Vec<BotDescriptor>>;
}

/// Creates one transport client per runner start.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a client bound to the descriptor's credential.
    ///
    /// Failing here (bad token, unreachable API) is a start failure.
    async fn create_client(&self, descriptor: &BotDescriptor) -> Result<Arc<dyn TransportClient>>;
}

/// One long-polling connection for one bot credential.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Bot username as reported by the transport, when known.
    fn username(&self) -> Option<String>;

    /// Run a single long-poll round and return the new events in order.
    ///
    /// The client tracks its own offset, so events are not returned twice
    /// unless the transport redelivers them.
    async fn fetch_updates(&self) -> Result<Vec<InboundEvent>>;

    /// Release the client. Must be idempotent.
    async fn close(&self);
}

/// Business logic boundary invoked once per inbound event.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &BotContext,
        client: Arc<dyn TransportClient>,
        event: InboundEvent,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Destination for flushed notification batches.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, chat_id: ChatId, text: &str) -> Result<()>;
}

/// Callback for errors that the runtime logs but never propagates
/// (polling failures, start failures).
pub type ErrorReporter = Arc<dyn Fn(&BotKey, &Error) + Send + Sync>;
