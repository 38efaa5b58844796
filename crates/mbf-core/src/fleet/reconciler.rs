use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::{sync::Mutex, task::JoinSet, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::RECONCILE_INTERVAL,
    domain::{BotDescriptor, BotKey},
    ports::DesiredStateSource,
    Result,
};

use super::{
    registry::FleetRegistry,
    runner::{Runner, RunnerDeps, RunnerState},
};

/// What one reconciliation pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub started: Vec<BotKey>,
    pub stopped: Vec<BotKey>,
    pub failed: Vec<BotKey>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failed.is_empty()
    }
}

pub type ReportHook = Arc<dyn Fn(&ReconcileReport) + Send + Sync>;

/// Keeps the set of running bots equal to the desired state.
///
/// The main bot has no desired-state record: it is registered through
/// [`FleetReconciler::start_main`] and only stopped by
/// [`FleetReconciler::shutdown`].
pub struct FleetReconciler {
    registry: Arc<FleetRegistry>,
    source: Arc<dyn DesiredStateSource>,
    deps: RunnerDeps,
    interval: Duration,
    main: Mutex<Option<BotDescriptor>>,
    on_report: Option<ReportHook>,
}

impl FleetReconciler {
    pub fn new(
        registry: Arc<FleetRegistry>,
        source: Arc<dyn DesiredStateSource>,
        deps: RunnerDeps,
    ) -> Self {
        Self {
            registry,
            source,
            deps,
            interval: RECONCILE_INTERVAL,
            main: Mutex::new(None),
            on_report: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_report_hook(mut self, hook: ReportHook) -> Self {
        self.on_report = Some(hook);
        self
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    /// Register and eagerly start the main bot.
    ///
    /// If the start fails the error is returned and every following pass
    /// retries it until it runs.
    pub async fn start_main(&self, descriptor: BotDescriptor) -> Result<()> {
        let descriptor = BotDescriptor {
            key: BotKey::Main,
            enabled: true,
            ..descriptor
        };
        *self.main.lock().await = Some(descriptor.clone());
        self.start_runner(descriptor).await.map(|_| ())
    }

    /// Read the desired state and apply it.
    ///
    /// A failed read aborts this pass only.
    pub async fn run_pass(&self) -> Result<ReconcileReport> {
        let desired = self.source.list_enabled().await?;
        Ok(self.reconcile(&desired).await)
    }

    /// Start missing runners and stop the ones no longer enabled.
    ///
    /// Runners that stay enabled are never touched.
    pub async fn reconcile(&self, desired: &[BotDescriptor]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let enabled: HashSet<&BotKey> = desired
            .iter()
            .filter(|d| d.enabled && !d.key.is_main())
            .map(|d| &d.key)
            .collect();

        let main = self.main.lock().await.clone();
        let to_start = main
            .into_iter()
            .chain(desired.iter().filter(|d| enabled.contains(&d.key)).cloned());

        for descriptor in to_start {
            if self.registry.contains(&descriptor.key) {
                continue;
            }
            let key = descriptor.key.clone();
            match self.start_runner(descriptor).await {
                Ok(true) => report.started.push(key),
                Ok(false) => debug!(bot = %key, "runner claimed by a concurrent pass"),
                Err(_) => report.failed.push(key),
            }
        }

        for key in self.registry.keys() {
            if key.is_main() || enabled.contains(&key) {
                continue;
            }
            if let Some(runner) = self.registry.remove(&key) {
                runner.stop().await;
                report.stopped.push(key);
            }
        }

        report
    }

    /// Claim the key in the registry and start the runner.
    ///
    /// `Ok(false)` means another caller already owns the key. On a failed
    /// start the entry is rolled back so the next pass can retry.
    async fn start_runner(&self, descriptor: BotDescriptor) -> Result<bool> {
        let runner = Arc::new(Runner::new(descriptor, self.deps.clone()));
        if !self.registry.try_insert(Arc::clone(&runner)) {
            return Ok(false);
        }

        if let Err(e) = runner.start().await {
            self.registry.remove_if_same(&runner);
            error!(bot = %runner.key(), error = %e, "failed to start runner");
            if let Some(report) = &self.deps.on_error {
                report(runner.key(), &e);
            }
            return Err(e);
        }

        Ok(true)
    }

    /// Run passes every interval until `shutdown` fires, then stop the fleet.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, "fleet reconciler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }

            // Each pass runs in its own task so a panic only loses that pass.
            let me = Arc::clone(&self);
            match tokio::spawn(async move { me.run_pass().await }).await {
                Ok(Ok(report)) => self.publish(&report),
                Ok(Err(e)) => warn!(error = %e, "desired state unavailable; skipping pass"),
                Err(e) => error!(error = %e, "reconciliation pass panicked"),
            }
        }

        self.shutdown().await;
        info!("fleet reconciler stopped");
    }

    fn publish(&self, report: &ReconcileReport) {
        if report.is_empty() {
            return;
        }
        info!(
            started = report.started.len(),
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            running = self.registry.len(),
            "reconciliation pass applied changes"
        );
        if let Some(hook) = &self.on_report {
            hook(report);
        }
    }

    /// Stop every registered runner, main bot included.
    pub async fn shutdown(&self) {
        let runners = self.registry.drain();
        if runners.is_empty() {
            return;
        }
        info!(count = runners.len(), "stopping all runners");

        let mut stops = JoinSet::new();
        for runner in runners {
            stops.spawn(async move { runner.stop().await });
        }
        while let Some(res) = stops.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "runner stop panicked");
            }
        }
    }

    /// Running state of every registered bot, sorted by key.
    pub async fn status(&self) -> Vec<(BotKey, RunnerState)> {
        let mut out = Vec::new();
        for key in self.registry.keys() {
            if let Some(runner) = self.registry.get(&key) {
                out.push((key, runner.state().await));
            }
        }
        out
    }
}
