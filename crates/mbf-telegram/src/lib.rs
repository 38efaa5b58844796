//! Telegram adapter (teloxide).
//!
//! Implements the `mbf-core` transport, notification sink and update-handler
//! ports over the Bot API using long polling.

mod handler;
mod sink;
mod transport;

pub use handler::ActivityHandler;
pub use sink::TelegramSink;
pub use transport::{TelegramClient, TelegramTransportFactory};
