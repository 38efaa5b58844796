use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{ports::NotificationSink, utils::pack_messages};

use super::{
    config::{NotifierConfig, NotifyChannel},
    queue::{NotificationItem, NotificationQueue},
};

const COMBINE_SEPARATOR: &str = "\n\n";

/// Outcome of one flush pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub drained: usize,
    pub sent: usize,
    pub failed: usize,
    /// Items whose channel was switched off between enqueue and flush.
    pub skipped: usize,
}

/// Single consumer of the [`NotificationQueue`].
pub struct NotificationFlusher {
    queue: Arc<NotificationQueue>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationFlusher {
    pub fn new(queue: Arc<NotificationQueue>, sink: Arc<dyn NotificationSink>) -> Self {
        Self { queue, sink }
    }

    /// Wait for work, flush, repeat until `shutdown` fires.
    ///
    /// Sleeps on "an item arrived" or "flush interval elapsed", whichever
    /// comes first. After shutdown the backlog present at that moment is
    /// drained batch by batch before returning.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(capacity = self.queue.capacity(), "notification flush loop started");

        while !shutdown.is_cancelled() {
            if self.queue.is_empty() {
                let interval = self.queue.config().flush_interval();
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = self.queue.wait_available() => {}
                    _ = sleep(interval) => {}
                }
            }
            self.flush_once().await;
        }

        let sent = self.drain_backlog().await;
        info!(
            sent,
            left = self.queue.len(),
            dropped = self.queue.dropped(),
            "notification flush loop stopped"
        );
    }

    /// Drain up to one batch and deliver it grouped by channel.
    pub async fn flush_once(&self) -> FlushReport {
        let cfg = self.queue.config();
        let items = self.queue.drain(cfg.batch_size.max(1));
        if items.is_empty() {
            return FlushReport::default();
        }
        self.deliver(&cfg, items).await
    }

    /// Flush until the backlog seen on entry is gone. Bounded by the number of
    /// batches that backlog needs, so late producers cannot keep it running.
    async fn drain_backlog(&self) -> usize {
        let batch = self.queue.config().batch_size.max(1);
        let passes = self.queue.len().div_ceil(batch);
        let mut sent = 0;
        for _ in 0..passes {
            let report = self.flush_once().await;
            if report.drained == 0 {
                break;
            }
            sent += report.sent;
        }
        sent
    }

    async fn deliver(&self, cfg: &NotifierConfig, items: Vec<NotificationItem>) -> FlushReport {
        let mut report = FlushReport {
            drained: items.len(),
            ..FlushReport::default()
        };

        for (channel, texts) in group_by_channel(items) {
            let Some(chat_id) = cfg.destination(channel) else {
                debug!(
                    channel = channel.as_str(),
                    count = texts.len(),
                    "channel disabled since enqueue; skipping"
                );
                report.skipped += texts.len();
                continue;
            };

            let messages = if cfg.combine_into_single_message {
                pack_messages(&texts, COMBINE_SEPARATOR, cfg.max_message_len)
            } else {
                texts
                    .iter()
                    .flat_map(|t| pack_messages(std::slice::from_ref(t), "", cfg.max_message_len))
                    .collect()
            };

            for message in messages {
                match self.sink.send(chat_id, &message).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        report.failed += 1;
                        warn!(
                            channel = channel.as_str(),
                            chat_id = chat_id.0,
                            error = %e,
                            "notification delivery failed"
                        );
                    }
                }
            }
        }

        report
    }
}

/// Group texts by channel, channels in order of first appearance and texts
/// in queue order.
fn group_by_channel(items: Vec<NotificationItem>) -> Vec<(NotifyChannel, Vec<String>)> {
    let mut groups: Vec<(NotifyChannel, Vec<String>)> = Vec::new();
    for item in items {
        match groups.iter_mut().find(|(ch, _)| *ch == item.channel) {
            Some((_, texts)) => texts.push(item.text),
            None => groups.push((item.channel, vec![item.text])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::ChatId, Error, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::watch;

    #[derive(Default)]
    struct FakeSink {
        sends: Mutex<Vec<(i64, String)>>,
        fail_chats: Mutex<Vec<i64>>,
    }

    impl FakeSink {
        fn sent(&self) -> Vec<(i64, String)> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for FakeSink {
        async fn send(&self, chat_id: ChatId, text: &str) -> Result<()> {
            if self.fail_chats.lock().unwrap().contains(&chat_id.0) {
                return Err(Error::Delivery {
                    chat_id,
                    reason: "chat not found".to_string(),
                });
            }
            self.sends.lock().unwrap().push((chat_id.0, text.to_string()));
            Ok(())
        }
    }

    fn setup(
        cfg: NotifierConfig,
    ) -> (
        watch::Sender<NotifierConfig>,
        Arc<NotificationQueue>,
        Arc<FakeSink>,
        NotificationFlusher,
    ) {
        let cfg = cfg
            .with_channel(NotifyChannel::Activity, 10)
            .with_channel(NotifyChannel::Errors, 20);
        let (tx, rx) = watch::channel(cfg);
        let queue = Arc::new(NotificationQueue::new(rx).unwrap());
        let sink = Arc::new(FakeSink::default());
        let flusher = NotificationFlusher::new(queue.clone(), sink.clone());
        (tx, queue, sink, flusher)
    }

    fn cfg(capacity: usize, batch_size: usize, combine: bool) -> NotifierConfig {
        NotifierConfig {
            capacity,
            batch_size,
            combine_into_single_message: combine,
            ..NotifierConfig::default()
        }
    }

    #[tokio::test]
    async fn drains_survivors_of_overflow_in_order() {
        let (_tx, queue, sink, flusher) = setup(cfg(3, 3, false));
        for t in ["A", "B", "C", "D"] {
            queue.try_enqueue(NotifyChannel::Activity, t);
        }

        let report = flusher.flush_once().await;

        assert_eq!(report.drained, 3);
        let texts: Vec<String> = sink.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["B", "C", "D"]);
    }

    #[tokio::test]
    async fn combined_batch_sends_once_per_channel() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 10, true));
        queue.try_enqueue(NotifyChannel::Activity, "a1");
        queue.try_enqueue(NotifyChannel::Errors, "e1");
        queue.try_enqueue(NotifyChannel::Activity, "a2");
        queue.try_enqueue(NotifyChannel::Errors, "e2");
        queue.try_enqueue(NotifyChannel::Activity, "a3");

        let report = flusher.flush_once().await;

        assert_eq!(report.sent, 2);
        assert_eq!(
            sink.sent(),
            vec![
                (10, "a1\n\na2\n\na3".to_string()),
                (20, "e1\n\ne2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn uncombined_batch_sends_each_item_in_order() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 10, false));
        queue.try_enqueue(NotifyChannel::Activity, "a1");
        queue.try_enqueue(NotifyChannel::Errors, "e1");
        queue.try_enqueue(NotifyChannel::Activity, "a2");

        flusher.flush_once().await;

        assert_eq!(
            sink.sent(),
            vec![
                (10, "a1".to_string()),
                (10, "a2".to_string()),
                (20, "e1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn batch_size_limits_one_pass() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 2, true));
        for t in ["1", "2", "3"] {
            queue.try_enqueue(NotifyChannel::Activity, t);
        }

        flusher.flush_once().await;
        assert_eq!(sink.sent(), vec![(10, "1\n\n2".to_string())]);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_group_does_not_block_others() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 10, true));
        sink.fail_chats.lock().unwrap().push(10);
        queue.try_enqueue(NotifyChannel::Activity, "lost");
        queue.try_enqueue(NotifyChannel::Errors, "kept");

        let report = flusher.flush_once().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(sink.sent(), vec![(20, "kept".to_string())]);
    }

    #[tokio::test]
    async fn channel_disabled_after_enqueue_is_skipped() {
        let (tx, queue, sink, flusher) = setup(cfg(100, 10, true));
        queue.try_enqueue(NotifyChannel::Activity, "a");
        queue.try_enqueue(NotifyChannel::Errors, "e");
        tx.send_modify(|c| {
            c.channels.remove(&NotifyChannel::Activity);
        });

        let report = flusher.flush_once().await;

        assert_eq!(report.skipped, 1);
        assert_eq!(sink.sent(), vec![(20, "e".to_string())]);
    }

    #[tokio::test]
    async fn long_groups_are_split_under_the_limit() {
        let mut c = cfg(100, 10, true);
        c.max_message_len = 10;
        let (_tx, queue, sink, flusher) = setup(c);
        queue.try_enqueue(NotifyChannel::Activity, "aaaa");
        queue.try_enqueue(NotifyChannel::Activity, "bbbb");
        queue.try_enqueue(NotifyChannel::Activity, "cccc");

        flusher.flush_once().await;

        let texts: Vec<String> = sink.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["aaaa\n\nbbbb", "cccc"]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_delivers_and_exits_on_shutdown() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 1, true));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(flusher.run(shutdown.clone()));

        queue.try_enqueue(NotifyChannel::Activity, "first");
        queue.try_enqueue(NotifyChannel::Errors, "second");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            sink.sent(),
            vec![(10, "first".to_string()), (20, "second".to_string())]
        );

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_whole_backlog_in_batches() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 1, true));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        for t in ["e1", "e2", "e3"] {
            queue.try_enqueue(NotifyChannel::Errors, t);
        }

        flusher.run(shutdown).await;

        let texts: Vec<String> = sink.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(texts, vec!["e1", "e2", "e3"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn zero_batch_size_after_reload_still_makes_progress() {
        let (tx, queue, sink, flusher) = setup(cfg(100, 1, true));
        queue.try_enqueue(NotifyChannel::Activity, "a");
        tx.send_modify(|c| c.batch_size = 0);

        let report = flusher.flush_once().await;

        assert_eq!(report.drained, 1);
        assert_eq!(sink.sent(), vec![(10, "a".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn final_pass_runs_after_shutdown() {
        let (_tx, queue, sink, flusher) = setup(cfg(100, 10, true));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        queue.try_enqueue(NotifyChannel::Activity, "late");

        flusher.run(shutdown).await;

        assert_eq!(sink.sent(), vec![(10, "late".to_string())]);
    }
}
