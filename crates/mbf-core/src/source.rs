//! File-backed desired state for mirror bots.
//!
//! The persistence layer (or an operator) keeps a JSON array of mirror
//! records; the file is re-read on every reconciliation tick.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
    domain::{BotDescriptor, BotKey, UserId},
    ports::DesiredStateSource,
    Result,
};

#[derive(Clone, Debug, Deserialize)]
struct MirrorRecord {
    id: String,
    owner: i64,
    token: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    last_seen: Option<DateTime<Utc>>,
    #[serde(default)]
    last_error: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl From<MirrorRecord> for BotDescriptor {
    fn from(r: MirrorRecord) -> Self {
        Self {
            key: BotKey::Mirror(r.id),
            owner: Some(UserId(r.owner)),
            token: r.token,
            enabled: r.enabled,
            last_seen: r.last_seen,
            last_error: r.last_error,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileMirrorSource {
    path: PathBuf,
}

impl FileMirrorSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn parse(json: &str) -> Result<Vec<BotDescriptor>> {
        let records: Vec<MirrorRecord> = serde_json::from_str(json)?;
        Ok(records
            .into_iter()
            .filter(|r| r.enabled && !r.token.trim().is_empty())
            .map(BotDescriptor::from)
            .collect())
    }
}

#[async_trait]
impl DesiredStateSource for FileMirrorSource {
    async fn list_enabled(&self) -> Result<Vec<BotDescriptor>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(txt) => Self::parse(&txt),
            // No file means no mirrors registered yet.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
