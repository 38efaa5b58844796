use std::sync::Arc;

use mbf_core::{
    config::Config,
    domain::{BotDescriptor, BotKey},
    fleet::{FleetReconciler, FleetRegistry, ReconcileReport, RunnerDeps},
    notify::{
        spawn_config_watcher, NotificationFlusher, NotificationQueue, NotifierConfig,
        NotifyChannel, ThrottleConfig, ThrottledSink,
    },
    source::FileMirrorSource,
};
use mbf_telegram::{ActivityHandler, TelegramSink, TelegramTransportFactory};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), mbf_core::Error> {
    mbf_core::logging::init("mbf")?;

    let cfg = Config::load()?;
    let shutdown = CancellationToken::new();

    // Notifications
    let (notifier_tx, notifier_rx) =
        watch::channel(NotifierConfig::load_or_default(&cfg.notifier_config_file)?);
    let watcher = spawn_config_watcher(
        cfg.notifier_config_file.clone(),
        notifier_tx,
        shutdown.clone(),
    );
    let queue = Arc::new(NotificationQueue::new(notifier_rx)?);
    let sink = Arc::new(ThrottledSink::new(
        Arc::new(TelegramSink::new(cfg.main_bot_token.clone())),
        ThrottleConfig::default(),
    ));
    let flusher = NotificationFlusher::new(queue.clone(), sink);

    // Fleet
    let on_error = {
        let queue = queue.clone();
        Arc::new(move |key: &BotKey, err: &mbf_core::Error| {
            queue.try_enqueue(NotifyChannel::Errors, format!("⚠️ {key}: {err}"));
        })
    };
    let mut deps = RunnerDeps::new(
        Arc::new(TelegramTransportFactory::new(cfg.poll_timeout)),
        Arc::new(ActivityHandler::new(queue.clone())),
    )
    .with_error_reporter(on_error);
    deps.error_delay = cfg.poll_error_delay;
    deps.stop_timeout = cfg.stop_timeout;

    let on_report = {
        let queue = queue.clone();
        Arc::new(move |report: &ReconcileReport| publish_report(&queue, report))
    };
    let reconciler = Arc::new(
        FleetReconciler::new(
            Arc::new(FleetRegistry::new()),
            Arc::new(FileMirrorSource::new(cfg.mirror_bots_file.clone())),
            deps,
        )
        .with_report_hook(on_report),
    );

    let main_bot = BotDescriptor::main(cfg.main_bot_token.clone(), cfg.main_bot_owner);
    if let Err(e) = reconciler.start_main(main_bot).await {
        warn!(error = %e, "main bot failed to start; retrying on next pass");
    }

    let fleet_task = tokio::spawn(reconciler.run(shutdown.clone()));
    // Separate token so the flusher outlives the runners.
    let flush_stop = CancellationToken::new();
    let flush_task = tokio::spawn(flusher.run(flush_stop.clone()));

    info!(
        mirrors = %cfg.mirror_bots_file.display(),
        notifier = %cfg.notifier_config_file.display(),
        "fleet started"
    );

    wait_for_signal().await;
    info!("shutting down");
    shutdown.cancel();

    if let Err(e) = fleet_task.await {
        warn!(error = %e, "fleet task ended abnormally");
    }
    flush_stop.cancel();
    if let Err(e) = flush_task.await {
        warn!(error = %e, "flush task ended abnormally");
    }
    if let Err(e) = watcher.await {
        warn!(error = %e, "notifier config watcher ended abnormally");
    }

    info!("bye");
    Ok(())
}

/// Failed starts already reach the errors channel through the error reporter.
fn publish_report(queue: &NotificationQueue, report: &ReconcileReport) {
    for key in &report.started {
        queue.try_enqueue(NotifyChannel::Mirrors, format!("🟢 {key} started"));
    }
    for key in &report.stopped {
        queue.try_enqueue(NotifyChannel::Mirrors, format!("🔴 {key} stopped"));
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
