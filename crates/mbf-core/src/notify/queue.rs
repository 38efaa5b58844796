use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::Result;

use super::config::{NotifierConfig, NotifyChannel};

/// One pending notification. Consumed once by the flush loop or evicted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationItem {
    pub channel: NotifyChannel,
    pub text: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Bounded multi-producer / single-consumer notification buffer.
///
/// Producers never block and never fail on a full buffer: the oldest item is
/// evicted to make room (drop-oldest).
pub struct NotificationQueue {
    items: Mutex<VecDeque<NotificationItem>>,
    available: Notify,
    dropped: AtomicU64,
    config: watch::Receiver<NotifierConfig>,
}

impl NotificationQueue {
    /// Build a queue over the live config; the current snapshot must be valid.
    pub fn new(config: watch::Receiver<NotifierConfig>) -> Result<Self> {
        config.borrow().validate()?;
        Ok(Self {
            items: Mutex::new(VecDeque::new()),
            available: Notify::new(),
            dropped: AtomicU64::new(0),
            config,
        })
    }

    /// Latest config snapshot.
    pub fn config(&self) -> NotifierConfig {
        self.config.borrow().clone()
    }

    /// Queue `text` for `channel`.
    ///
    /// Returns `false` without buffering when the notifier or the channel is
    /// disabled right now.
    pub fn try_enqueue(&self, channel: NotifyChannel, text: impl Into<String>) -> bool {
        let capacity = {
            let cfg = self.config.borrow();
            if cfg.destination(channel).is_none() {
                return false;
            }
            cfg.capacity.max(1)
        };
        let item = NotificationItem {
            channel,
            text: text.into(),
            enqueued_at: Utc::now(),
        };

        {
            let mut items = self.lock();
            // A reload may have shrunk the capacity below the current length.
            let mut evicted = 0u64;
            while items.len() >= capacity {
                items.pop_front();
                evicted += 1;
            }
            if evicted > 0 {
                let total = self.dropped.fetch_add(evicted, Ordering::Relaxed) + evicted;
                debug!(
                    channel = channel.as_str(),
                    evicted,
                    dropped_total = total,
                    "notification queue full; dropped oldest"
                );
            }
            items.push_back(item);
        }

        self.available.notify_one();
        true
    }

    /// Remove and return up to `max` items, oldest first.
    pub fn drain(&self, max: usize) -> Vec<NotificationItem> {
        let mut items = self.lock();
        let n = max.min(items.len());
        items.drain(..n).collect()
    }

    /// Resolves once an item has been enqueued since the last wake-up.
    pub async fn wait_available(&self) {
        self.available.notified().await;
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Capacity from the latest config snapshot.
    pub fn capacity(&self) -> usize {
        self.config.borrow().capacity.max(1)
    }

    /// Items evicted by drop-oldest since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<NotificationItem>> {
        // The buffer stays consistent even if a holder panicked.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
