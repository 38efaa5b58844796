use std::{sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::{sync::CancellationToken, task::AbortOnDropHandle};
use tracing::{debug, error, info, warn};

use crate::{
    domain::{BotContext, BotDescriptor, BotKey, InboundEvent},
    ports::{ErrorReporter, TransportClient, TransportFactory, UpdateHandler},
    Error, Result,
};

/// Collaborators shared by every runner in the fleet.
#[derive(Clone)]
pub struct RunnerDeps {
    pub factory: Arc<dyn TransportFactory>,
    pub handler: Arc<dyn UpdateHandler>,
    pub on_error: Option<ErrorReporter>,
    /// Pause after a failed poll before the next attempt.
    pub error_delay: Duration,
    /// Upper bound on waiting for the polling task to exit on stop.
    pub stop_timeout: Duration,
}

impl RunnerDeps {
    pub fn new(factory: Arc<dyn TransportFactory>, handler: Arc<dyn UpdateHandler>) -> Self {
        Self {
            factory,
            handler,
            on_error: None,
            error_delay: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_error_reporter(mut self, on_error: ErrorReporter) -> Self {
        self.on_error = Some(on_error);
        self
    }

    fn report(&self, key: &BotKey, err: &Error) {
        if let Some(report) = &self.on_error {
            report(key, err);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Running,
    /// Terminal.
    Stopped,
}

/// Owns one long-polling loop against one bot credential.
///
/// `start` and `stop` are idempotent. Ownership of a runner (who may start
/// or stop it) is decided by the [`super::FleetRegistry`], not here.
pub struct Runner {
    descriptor: BotDescriptor,
    deps: RunnerDeps,
    inner: Mutex<RunnerInner>,
}

struct RunnerInner {
    state: RunnerState,
    cancel: Option<CancellationToken>,
    client: Option<Arc<dyn TransportClient>>,
    task: Option<JoinHandle<()>>,
}

impl Runner {
    pub fn new(descriptor: BotDescriptor, deps: RunnerDeps) -> Self {
        Self {
            descriptor,
            deps,
            inner: Mutex::new(RunnerInner {
                state: RunnerState::Idle,
                cancel: None,
                client: None,
                task: None,
            }),
        }
    }

    pub fn key(&self) -> &BotKey {
        &self.descriptor.key
    }

    pub fn descriptor(&self) -> &BotDescriptor {
        &self.descriptor
    }

    pub async fn state(&self) -> RunnerState {
        self.inner.lock().await.state
    }

    /// Open the transport client and launch the polling loop.
    ///
    /// Returns as soon as the loop is spawned. A no-op when already running;
    /// a stopped runner cannot be started again.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            RunnerState::Running => return Ok(()),
            RunnerState::Stopped => return Err(Error::RunnerStopped(self.key().clone())),
            RunnerState::Idle => {}
        }

        let client = self
            .deps
            .factory
            .create_client(&self.descriptor)
            .await
            .map_err(|e| Error::StartFailed {
                key: self.key().clone(),
                reason: e.to_string(),
            })?;

        let ctx = BotContext {
            key: self.key().clone(),
            owner: self.descriptor.owner,
            username: client.username(),
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(
            ctx.clone(),
            Arc::clone(&client),
            self.deps.clone(),
            cancel.clone(),
        ));

        inner.state = RunnerState::Running;
        inner.cancel = Some(cancel);
        inner.client = Some(client);
        inner.task = Some(task);

        info!(bot = %ctx.key, username = ?ctx.username, "runner started");
        Ok(())
    }

    /// Cancel the polling loop and release the transport client.
    ///
    /// Safe to call any number of times; only the first call does work.
    pub async fn stop(&self) {
        let (cancel, client, task) = {
            let mut inner = self.inner.lock().await;
            if inner.state == RunnerState::Stopped {
                return;
            }
            inner.state = RunnerState::Stopped;
            (inner.cancel.take(), inner.client.take(), inner.task.take())
        };

        if let Some(cancel) = cancel {
            cancel.cancel();
        }

        if let Some(mut task) = task {
            match tokio::time::timeout(self.deps.stop_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(bot = %self.key(), error = %e, "polling task panicked"),
                Err(_) => {
                    warn!(
                        bot = %self.key(),
                        timeout = ?self.deps.stop_timeout,
                        "polling task did not exit in time; aborting"
                    );
                    task.abort();
                }
            }
        }

        if let Some(client) = client {
            client.close().await;
        }

        info!(bot = %self.key(), "runner stopped");
    }
}

async fn poll_loop(
    ctx: BotContext,
    client: Arc<dyn TransportClient>,
    deps: RunnerDeps,
    cancel: CancellationToken,
) {
    debug!(bot = %ctx.key, "polling loop started");

    loop {
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = client.fetch_updates() => res,
        };

        match polled {
            Ok(events) => {
                for event in events {
                    if cancel.is_cancelled() {
                        break;
                    }
                    dispatch(&ctx, &client, &deps, event, &cancel).await;
                }
            }
            Err(e) => {
                warn!(bot = %ctx.key, error = %e, "polling failed; retrying");
                deps.report(&ctx.key, &e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(deps.error_delay) => {}
                }
            }
        }
    }

    debug!(bot = %ctx.key, "polling loop exited");
}

/// Run the handler for one event in its own task and wait for it, so a
/// panicking handler cannot take the polling loop down with it.
///
/// The task is aborted if this future is dropped, which happens when `stop`
/// gives up waiting and aborts the polling loop.
async fn dispatch(
    ctx: &BotContext,
    client: &Arc<dyn TransportClient>,
    deps: &RunnerDeps,
    event: InboundEvent,
    cancel: &CancellationToken,
) {
    let update_id = event.update_id;
    let handler = Arc::clone(&deps.handler);
    let task_ctx = ctx.clone();
    let task_client = Arc::clone(client);
    let token = cancel.child_token();

    let job = AbortOnDropHandle::new(tokio::spawn(async move {
        handler
            .handle(&task_ctx, task_client, event, token)
            .await
    }));

    match job.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(bot = %ctx.key, update_id, error = %e, "update handler failed"),
        Err(e) => error!(bot = %ctx.key, update_id, error = %e, "update handler panicked"),
    }
}
