//! Notifier configuration, reloadable while the process runs.
//!
//! The config lives in a JSON file. [`spawn_config_watcher`] polls its mtime
//! and publishes every successfully parsed snapshot into a `watch` channel;
//! readers always see the latest good snapshot.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use serde::Deserialize;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{domain::ChatId, errors::Error, Result};

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

/// Destination tag of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyChannel {
    /// User activity on any bot of the fleet.
    Activity,
    /// Operational errors (polling failures, failed starts).
    Errors,
    /// Mirror bots started or stopped.
    Mirrors,
    /// Payment events reported by the business layer.
    Payments,
}

impl NotifyChannel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Activity => "activity",
            Self::Errors => "errors",
            Self::Mirrors => "mirrors",
            Self::Payments => "payments",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub chat_id: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub enabled: bool,
    /// Read once when the queue is built.
    pub capacity: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub combine_into_single_message: bool,
    /// Longest message handed to the sink (Telegram caps at 4096).
    pub max_message_len: usize,
    pub channels: HashMap<NotifyChannel, ChannelConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            batch_size: 1,
            flush_interval_ms: 1000,
            combine_into_single_message: true,
            max_message_len: 4000,
            channels: HashMap::new(),
        }
    }
}

impl NotifierConfig {
    pub fn parse(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load the file, falling back to defaults when it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(txt) => Self::parse(&txt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no notifier config file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::Config("notifier capacity must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("notifier batch_size must be > 0".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(Error::Config(
                "notifier flush_interval_ms must be > 0".to_string(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(Error::Config(
                "notifier max_message_len must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Chat to deliver `channel` to, or `None` when the notifier or the
    /// channel is disabled or has no chat configured.
    pub fn destination(&self, channel: NotifyChannel) -> Option<ChatId> {
        if !self.enabled {
            return None;
        }
        let ch = self.channels.get(&channel)?;
        if !ch.enabled {
            return None;
        }
        ch.chat_id.map(ChatId)
    }

    pub fn with_channel(mut self, channel: NotifyChannel, chat_id: i64) -> Self {
        self.channels.insert(
            channel,
            ChannelConfig {
                enabled: true,
                chat_id: Some(chat_id),
            },
        );
        self
    }
}

/// Poll `path` for changes and publish reloaded configs into `tx`.
///
/// A file that fails to parse keeps the previous snapshot in place.
pub fn spawn_config_watcher(
    path: PathBuf,
    tx: watch::Sender<NotifierConfig>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_modified = modified_at(&path);
        let mut tick = tokio::time::interval(WATCH_INTERVAL);
        debug!(path = %path.display(), "notifier config watcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {
                    let modified = modified_at(&path);
                    if modified.is_none() || modified <= last_modified {
                        continue;
                    }
                    last_modified = modified;

                    match reload(&path) {
                        Ok(cfg) => {
                            info!(path = %path.display(), "notifier config reloaded");
                            tx.send_replace(cfg);
                        }
                        Err(e) => warn!(
                            path = %path.display(),
                            error = %e,
                            "invalid notifier config; keeping previous"
                        ),
                    }
                }
            }
        }
    })
}

fn reload(path: &Path) -> Result<NotifierConfig> {
    let txt = fs::read_to_string(path)?;
    NotifierConfig::parse(&txt)
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|md| md.modified()).ok()
}
