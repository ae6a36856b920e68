//! Event batching.
//!
//! The batcher aggregates processed events into size/count/time-bounded
//! batches per sink, keyed by their group tags, and releases them through an
//! optional group-level stage that coalesces small flushes. It is wrapped in
//! an actor service so producers share it without locks: a cloneable handle
//! feeds commands over a channel to a single service task that owns the
//! state (the same shape the rest of the agent uses for shared mutable
//! services).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::batch::status::{BatchStatus, GroupBatchStatus};
use crate::config::flush_strategy::{EventFlushStrategy, GroupFlushStrategy};
use crate::events::{Event, EventGroup, GroupMetadata};

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct Bucket {
    status: BatchStatus,
    tags: Vec<(String, String)>,
    metadata: GroupMetadata,
    events: Vec<Event>,
}

impl Bucket {
    fn into_group(self) -> EventGroup {
        let mut group = EventGroup::new();
        for (k, v) in self.tags {
            group.set_tag(k, v);
        }
        *group.metadata_mut() = self.metadata;
        for event in self.events {
            group.push(event);
        }
        group
    }
}

/// Aggregates events into bounded batches per group key.
#[derive(Debug)]
pub struct Batcher {
    strategy: EventFlushStrategy,
    group_strategy: Option<GroupFlushStrategy>,
    buckets: HashMap<String, Bucket>,
    pending: Vec<EventGroup>,
    pending_status: GroupBatchStatus,
}

impl Batcher {
    #[must_use]
    pub fn new(strategy: EventFlushStrategy, group_strategy: Option<GroupFlushStrategy>) -> Self {
        Batcher {
            strategy,
            group_strategy,
            buckets: HashMap::new(),
            pending: Vec::new(),
            pending_status: GroupBatchStatus::new(unix_now()),
        }
    }

    /// Adds all events of `group`, returning any batches that became ready.
    pub fn add_group(&mut self, mut group: EventGroup, now_secs: i64) -> Vec<EventGroup> {
        let key = Self::bucket_key(&group);
        let tags: Vec<(String, String)> = group
            .tags()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let metadata = group.metadata().clone();
        let events = group.take_events();

        let mut full = Vec::new();
        for event in events {
            let bucket = self.buckets.entry(key.clone()).or_insert_with(|| Bucket {
                status: BatchStatus::new(now_secs),
                tags: tags.clone(),
                metadata: metadata.clone(),
                ..Bucket::default()
            });

            if self.strategy.need_flush_by_time(&bucket.status, &event, now_secs) {
                full.push(Self::rotate(bucket, now_secs, &tags, &metadata));
            }

            // Never split a payload mid-event: if the incoming event would
            // push a non-empty batch past the hard cap, close the batch
            // first so only a single oversized event can ever exceed it.
            let event_size = event.data_size() as u64;
            if bucket.status.event_count() > 0
                && bucket.status.size_bytes() + event_size >= self.strategy.max_size_bytes
            {
                full.push(Self::rotate(bucket, now_secs, &tags, &metadata));
            }

            bucket.status.update(event_size);
            bucket.events.push(event);

            if self.strategy.size_reaching_upper_limit(&bucket.status)
                || self.strategy.need_flush_by_size(&bucket.status)
                || self.strategy.need_flush_by_count(&bucket.status)
            {
                full.push(Self::rotate(bucket, now_secs, &tags, &metadata));
            }
        }
        self.release(full, now_secs, false)
    }

    /// Flushes batches whose age exceeded the strategy timeout.
    pub fn flush_due(&mut self, now_secs: i64) -> Vec<EventGroup> {
        let timeout = self.strategy.timeout_secs as i64;
        let mut full = Vec::new();
        self.buckets.retain(|_, bucket| {
            if bucket.status.event_count() > 0
                && now_secs - bucket.status.create_time_secs() >= timeout
            {
                full.push(std::mem::take(bucket).into_group());
                false
            } else {
                true
            }
        });
        self.release(full, now_secs, false)
    }

    /// Flushes everything, bypassing the group stage gating.
    pub fn flush_all(&mut self, now_secs: i64) -> Vec<EventGroup> {
        let full: Vec<EventGroup> = self
            .buckets
            .drain()
            .filter(|(_, b)| b.status.event_count() > 0)
            .map(|(_, b)| b.into_group())
            .collect();
        self.release(full, now_secs, true)
    }

    fn rotate(
        bucket: &mut Bucket,
        now_secs: i64,
        tags: &[(String, String)],
        metadata: &GroupMetadata,
    ) -> EventGroup {
        let done = std::mem::replace(
            bucket,
            Bucket {
                status: BatchStatus::new(now_secs),
                tags: tags.to_vec(),
                metadata: metadata.clone(),
                ..Bucket::default()
            },
        );
        done.into_group()
    }

    /// Routes full batches through the group stage. Group flush precedes
    /// sink flush: batches accumulate until the group strategy releases
    /// them, except on a forced flush.
    fn release(&mut self, full: Vec<EventGroup>, now_secs: i64, force: bool) -> Vec<EventGroup> {
        let Some(group_strategy) = self.group_strategy else {
            return full;
        };
        for group in full {
            if self.pending.is_empty() {
                self.pending_status.reset(now_secs);
            }
            self.pending_status.update(group.data_size() as u64);
            self.pending.push(group);
        }
        let due = force
            || group_strategy.need_flush_by_size(&self.pending_status)
            || (!self.pending.is_empty()
                && group_strategy.need_flush_by_time(&self.pending_status, now_secs));
        if due {
            std::mem::take(&mut self.pending)
        } else {
            Vec::new()
        }
    }

    fn bucket_key(group: &EventGroup) -> String {
        let mut key = String::new();
        for (k, v) in group.tags() {
            key.push_str(k);
            key.push('\u{1}');
            key.push_str(v);
            key.push('\u{2}');
        }
        key
    }
}

/// Commands accepted by the batcher service.
#[derive(Debug)]
pub enum BatcherCommand {
    /// Add a processed event group to the batcher.
    Add(EventGroup),
    /// Flush everything and acknowledge through the channel.
    FlushAll(oneshot::Sender<()>),
    /// Stop the service after a final flush.
    Shutdown,
}

/// Cloneable producer handle to the batcher service.
#[derive(Clone, Debug)]
pub struct BatcherHandle {
    tx: mpsc::UnboundedSender<BatcherCommand>,
}

impl BatcherHandle {
    pub fn add(&self, group: EventGroup) -> Result<(), mpsc::error::SendError<BatcherCommand>> {
        self.tx.send(BatcherCommand::Add(group))
    }

    /// Flushes all pending batches; resolves once the service drained them.
    pub async fn flush_all(&self) -> Result<(), String> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(BatcherCommand::FlushAll(done_tx))
            .map_err(|e| format!("failed to send flush command: {e}"))?;
        done_rx
            .await
            .map_err(|e| format!("failed to receive flush response: {e}"))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<BatcherCommand>> {
        self.tx.send(BatcherCommand::Shutdown)
    }
}

/// Service task owning a [`Batcher`]; ready batches flow to `out`.
pub struct BatcherService {
    batcher: Batcher,
    rx: mpsc::UnboundedReceiver<BatcherCommand>,
    out: mpsc::Sender<EventGroup>,
}

impl BatcherService {
    #[must_use]
    pub fn new(
        strategy: EventFlushStrategy,
        group_strategy: Option<GroupFlushStrategy>,
        out: mpsc::Sender<EventGroup>,
    ) -> (Self, BatcherHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            BatcherService {
                batcher: Batcher::new(strategy, group_strategy),
                rx,
                out,
            },
            BatcherHandle { tx },
        )
    }

    /// Runs until shutdown, flushing timed-out batches once per second.
    pub async fn run(mut self) {
        debug!("batcher service started");
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(BatcherCommand::Add(group)) => {
                            let ready = self.batcher.add_group(group, unix_now());
                            self.forward(ready).await;
                        }
                        Some(BatcherCommand::FlushAll(done)) => {
                            let ready = self.batcher.flush_all(unix_now());
                            self.forward(ready).await;
                            if done.send(()).is_err() {
                                error!("flush requester went away before the ack");
                            }
                        }
                        Some(BatcherCommand::Shutdown) | None => {
                            let ready = self.batcher.flush_all(unix_now());
                            self.forward(ready).await;
                            debug!("batcher service shutting down");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let ready = self.batcher.flush_due(unix_now());
                    self.forward(ready).await;
                }
            }
        }
    }

    async fn forward(&self, groups: Vec<EventGroup>) {
        for group in groups {
            if self.out.send(group).await.is_err() {
                error!("batch consumer dropped, discarding batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogEvent;

    fn log_group(lines: &[&str], timestamp: i64) -> EventGroup {
        let mut group = EventGroup::new();
        group.set_tag("source", "test");
        for line in lines {
            let mut log = LogEvent::new();
            log.header.set_timestamp(timestamp);
            log.set_content("content", *line);
            group.push(Event::Log(log));
        }
        group
    }

    fn strategy(min_count: u64, min_size: u64, max_size: u64, timeout: u64) -> EventFlushStrategy {
        EventFlushStrategy {
            max_size_bytes: max_size,
            min_size_bytes: min_size,
            min_count,
            timeout_secs: timeout,
        }
    }

    #[test]
    fn count_threshold_flushes() {
        let mut batcher = Batcher::new(strategy(3, u64::MAX, u64::MAX, 60), None);
        let out = batcher.add_group(log_group(&["a", "b"], 100), 100);
        assert!(out.is_empty());
        let out = batcher.add_group(log_group(&["c"], 100), 100);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), 3);
    }

    #[test]
    fn batch_upper_bound_holds_or_batch_is_single_event() {
        let max = 64u64;
        let mut batcher = Batcher::new(strategy(0, u64::MAX, max, 60), None);
        let lines = ["short", "x", "a much longer line that dominates the batch size", "y"];
        let mut emitted = batcher.add_group(log_group(&lines, 100), 100);
        emitted.extend(batcher.flush_all(100));
        assert!(!emitted.is_empty());
        for batch in &emitted {
            let size: usize = batch.events().iter().map(Event::data_size).sum();
            assert!(
                size as u64 <= max || batch.len() == 1,
                "batch of {} events and {} bytes exceeds the cap",
                batch.len(),
                size
            );
        }
    }

    #[test]
    fn event_order_is_preserved_within_batches() {
        let mut batcher = Batcher::new(strategy(10, u64::MAX, u64::MAX, 60), None);
        let _ = batcher.add_group(log_group(&["1", "2", "3"], 100), 100);
        let out = batcher.flush_all(100);
        assert_eq!(out.len(), 1);
        let contents: Vec<_> = out[0]
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::Log(l) => l.content("content"),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["1", "2", "3"]);
    }

    #[test]
    fn timed_flush_releases_old_batches() {
        let mut batcher = Batcher::new(strategy(100, u64::MAX, u64::MAX, 5), None);
        let _ = batcher.add_group(log_group(&["a"], 100), 100);
        assert!(batcher.flush_due(104).is_empty());
        let out = batcher.flush_due(105);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn distinct_tag_sets_batch_separately() {
        let mut batcher = Batcher::new(strategy(100, u64::MAX, u64::MAX, 60), None);
        let mut other = log_group(&["b"], 100);
        other.set_tag("source", "other");
        let _ = batcher.add_group(log_group(&["a"], 100), 100);
        let _ = batcher.add_group(other, 100);
        let out = batcher.flush_all(100);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn group_stage_gates_release_until_size() {
        let group_strategy = GroupFlushStrategy {
            min_size_bytes: 10_000,
            timeout_secs: 3600,
        };
        let mut batcher = Batcher::new(strategy(1, 0, u64::MAX, 60), Some(group_strategy));
        // each add flushes a sink batch (min_count = 1) but the group stage
        // holds it back
        let out = batcher.add_group(log_group(&["a"], 100), 100);
        assert!(out.is_empty());
        // forced flush bypasses the gate
        let out = batcher.flush_all(100);
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn service_round_trip() {
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let (service, handle) =
            BatcherService::new(strategy(2, u64::MAX, u64::MAX, 60), None, out_tx);
        tokio::spawn(service.run());

        handle.add(log_group(&["a", "b"], 100)).expect("add");
        let batch = out_rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 2);

        handle.add(log_group(&["c"], 100)).expect("add");
        handle.flush_all().await.expect("flush");
        let batch = out_rx.recv().await.expect("batch");
        assert_eq!(batch.len(), 1);

        handle.shutdown().expect("shutdown");
    }
}
