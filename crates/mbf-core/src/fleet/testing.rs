//! Fakes for the fleet ports, shared by the fleet unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{BotContext, BotDescriptor, ChatId, InboundEvent, InboundKind},
    ports::{DesiredStateSource, TransportClient, TransportFactory, UpdateHandler},
    Error, Result,
};

pub fn event(update_id: i64) -> InboundEvent {
    InboundEvent {
        update_id,
        kind: InboundKind::Message {
            chat_id: ChatId(100),
            from: None,
            username: None,
            text: Some(format!("msg {update_id}")),
        },
    }
}

type Script = VecDeque<Result<Vec<InboundEvent>>>;

#[derive(Default)]
pub struct FakeFactory {
    pub created: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub fail_tokens: Mutex<Vec<String>>,
    pub create_delay: Mutex<Option<Duration>>,
    scripts: Mutex<HashMap<String, Script>>,
}

impl FakeFactory {
    /// Poll results handed out, in order, to the next client for `token`.
    pub fn script(&self, token: &str, polls: Vec<Result<Vec<InboundEvent>>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), polls.into_iter().collect());
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create_client(&self, descriptor: &BotDescriptor) -> Result<Arc<dyn TransportClient>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_tokens.lock().unwrap().contains(&descriptor.token) {
            return Err(Error::Transport("unauthorized".to_string()));
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .remove(&descriptor.token)
            .unwrap_or_default();
        Ok(Arc::new(FakeClient {
            script: Mutex::new(script),
            closed: Arc::clone(&self.closed),
            is_closed: AtomicBool::new(false),
        }))
    }
}

struct FakeClient {
    script: Mutex<Script>,
    closed: Arc<AtomicUsize>,
    is_closed: AtomicBool,
}

#[async_trait]
impl TransportClient for FakeClient {
    fn username(&self) -> Option<String> {
        Some("fake_bot".to_string())
    }

    async fn fetch_updates(&self) -> Result<Vec<InboundEvent>> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(polled) => polled,
            // Nothing scripted: behave like an idle long poll.
            None => std::future::pending().await,
        }
    }

    async fn close(&self) {
        if !self.is_closed.swap(true, Ordering::SeqCst) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
pub struct RecordingHandler {
    seen: Mutex<Vec<i64>>,
    pub fail_on: Mutex<Vec<i64>>,
    pub panic_on: Mutex<Vec<i64>>,
}

impl RecordingHandler {
    pub fn seen(&self) -> Vec<i64> {
        self.seen.lock().unwrap().clone()
    }

    pub async fn wait_for(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.seen.lock().unwrap().len() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler did not receive the expected events");
    }
}

#[async_trait]
impl UpdateHandler for RecordingHandler {
    async fn handle(
        &self,
        _ctx: &BotContext,
        _client: Arc<dyn TransportClient>,
        event: InboundEvent,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.seen.lock().unwrap().push(event.update_id);
        if self.panic_on.lock().unwrap().contains(&event.update_id) {
            panic!("handler blew up on {}", event.update_id);
        }
        if self.fail_on.lock().unwrap().contains(&event.update_id) {
            return Err(Error::External("handler failed".to_string()));
        }
        Ok(())
    }
}

/// Desired-state source whose snapshot the test swaps between passes.
#[derive(Default)]
pub struct StaticSource {
    bots: Mutex<Vec<BotDescriptor>>,
    fail_next: AtomicBool,
}

impl StaticSource {
    pub fn set(&self, bots: Vec<BotDescriptor>) {
        *self.bots.lock().unwrap() = bots;
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DesiredStateSource for StaticSource {
    async fn list_enabled(&self) -> Result<Vec<BotDescriptor>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::External("database unavailable".to_string()));
        }
        Ok(self.bots.lock().unwrap().clone())
    }
}
