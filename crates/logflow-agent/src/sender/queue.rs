//! Per-sink send queue.
//!
//! A bounded FIFO of serialized batches with retry bookkeeping. Producers
//! enqueue without blocking and receive [`QueueError::QueueFull`] as the
//! backpressure signal; the sender dispatches the oldest ready item and
//! acknowledges it with a [`SendOutcome`]. Retryable failures re-enter the
//! queue with exponential backoff and full jitter until the attempt cap,
//! after which the item is dropped and an alarm raised.
//!
//! Items dispatched to the sender are co-owned: the queue keeps the retry
//! bookkeeping while the sender holds the payload, so neither side can
//! outlive the bytes it is using.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, error};

/// Identifier of one queued item, unique within a queue.
pub type ItemId = u64;

/// Final classification of one delivery attempt series.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    RetryableError,
    TerminalError,
}

/// Queue-level errors surfaced to producers.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("send queue full")]
    QueueFull,
}

/// Exponential backoff, capped, with full jitter.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `attempt + 1`; uniformly sampled from
    /// `[0, min(max, base * 2^attempt)]`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16));
        let ceiling = exp.min(self.max);
        if ceiling.is_zero() {
            return ceiling;
        }
        let nanos = rand::thread_rng().gen_range(0..=ceiling.as_nanos());
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Upper bound of the delay for attempt `attempt + 1`.
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(1u32 << attempt.min(16)).min(self.max)
    }
}

/// One serialized batch headed for a sink.
#[derive(Clone, Debug)]
struct QueuedItem {
    id: ItemId,
    payload: Bytes,
    enqueue_time: Instant,
    attempt_count: u32,
    next_attempt_time: Instant,
}

/// A queued item handed to the sender for one delivery attempt. The payload
/// is shared with the queue's bookkeeping entry.
#[derive(Clone, Debug)]
pub struct DispatchedItem {
    pub id: ItemId,
    pub payload: Bytes,
    pub attempt_count: u32,
}

/// Terminal record of one item, reported when the item leaves the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckRecord {
    pub outcome: SendOutcome,
    pub attempt_count: u32,
}

#[derive(Debug, Default)]
struct QueueInner {
    queue: VecDeque<QueuedItem>,
    in_flight: HashMap<ItemId, QueuedItem>,
    next_id: ItemId,
}

/// Bounded FIFO of serialized batches for one sink.
#[derive(Debug)]
pub struct SendQueue {
    sink: String,
    capacity: usize,
    max_attempts: u32,
    max_in_flight: usize,
    backoff: BackoffPolicy,
    inner: Mutex<QueueInner>,
}

impl SendQueue {
    #[must_use]
    pub fn new(
        sink: impl Into<String>,
        capacity: usize,
        max_attempts: u32,
        max_in_flight: usize,
        backoff: BackoffPolicy,
    ) -> Self {
        SendQueue {
            sink: sink.into(),
            capacity: capacity.max(1),
            max_attempts: max_attempts.max(1),
            max_in_flight: max_in_flight.max(1),
            backoff,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    #[must_use]
    pub fn sink(&self) -> &str {
        &self.sink
    }

    /// Enqueues a serialized batch without blocking.
    pub fn enqueue(&self, payload: Bytes) -> Result<ItemId, QueueError> {
        let mut inner = self.lock();
        if inner.queue.len() + inner.in_flight.len() >= self.capacity {
            return Err(QueueError::QueueFull);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let now = Instant::now();
        inner.queue.push_back(QueuedItem {
            id,
            payload,
            enqueue_time: now,
            attempt_count: 0,
            next_attempt_time: now,
        });
        Ok(id)
    }

    /// Pops the oldest item whose retry time has arrived, marking it
    /// in-flight. Returns `None` when nothing is ready or the in-flight
    /// gate is closed.
    #[must_use]
    pub fn peek_ready(&self, now: Instant) -> Option<DispatchedItem> {
        let mut inner = self.lock();
        if inner.in_flight.len() >= self.max_in_flight {
            return None;
        }
        let position = inner
            .queue
            .iter()
            .position(|item| item.next_attempt_time <= now)?;
        let item = inner.queue.remove(position)?;
        let dispatched = DispatchedItem {
            id: item.id,
            payload: item.payload.clone(),
            attempt_count: item.attempt_count + 1,
        };
        inner.in_flight.insert(item.id, item);
        Some(dispatched)
    }

    /// Acknowledges a dispatched item.
    ///
    /// `attempts_used` is how many transport attempts the sender spent on
    /// this dispatch (its internal retry loop may have made several); they
    /// all count against the item's attempt budget. Returns the terminal
    /// record when the item leaves the queue for good.
    pub fn ack(&self, id: ItemId, outcome: SendOutcome, attempts_used: u32) -> Option<AckRecord> {
        let mut inner = self.lock();
        let mut item = inner.in_flight.remove(&id)?;
        item.attempt_count += attempts_used.max(1);
        match outcome {
            SendOutcome::Ok => {
                debug!(
                    "sink {}: delivered batch {} after {} attempts in {:?}",
                    self.sink,
                    id,
                    item.attempt_count,
                    item.enqueue_time.elapsed()
                );
                Some(AckRecord {
                    outcome: SendOutcome::Ok,
                    attempt_count: item.attempt_count,
                })
            }
            SendOutcome::RetryableError if item.attempt_count < self.max_attempts => {
                item.next_attempt_time = Instant::now() + self.backoff.delay(item.attempt_count);
                inner.queue.push_back(item);
                None
            }
            SendOutcome::RetryableError | SendOutcome::TerminalError => {
                error!(
                    "sink {}: dropping batch {} after {} attempts",
                    self.sink, id, item.attempt_count
                );
                Some(AckRecord {
                    outcome,
                    attempt_count: item.attempt_count,
                })
            }
        }
    }

    /// Items waiting plus items in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.queue.len() + inner.in_flight.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Producers paused on [`QueueError::QueueFull`] resume once the queue
    /// drains below this watermark.
    #[must_use]
    pub fn below_low_water(&self) -> bool {
        self.len() <= self.capacity / 2
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(capacity: usize, max_attempts: u32) -> SendQueue {
        SendQueue::new(
            "test-sink",
            capacity,
            max_attempts,
            16,
            BackoffPolicy::default(),
        )
    }

    fn payload(text: &str) -> Bytes {
        Bytes::copy_from_slice(text.as_bytes())
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let q = queue(2, 3);
        q.enqueue(payload("a")).expect("enqueue");
        q.enqueue(payload("b")).expect("enqueue");
        assert_eq!(q.enqueue(payload("c")), Err(QueueError::QueueFull));
        assert!(!q.below_low_water());
    }

    #[test]
    fn fifo_order_on_success() {
        let q = queue(8, 3);
        let a = q.enqueue(payload("a")).expect("enqueue");
        let b = q.enqueue(payload("b")).expect("enqueue");

        let now = Instant::now();
        let first = q.peek_ready(now).expect("first");
        assert_eq!(first.id, a);
        let ack_a = q.ack(first.id, SendOutcome::Ok, 1).expect("ack a");
        let second = q.peek_ready(now).expect("second");
        assert_eq!(second.id, b);
        let ack_b = q.ack(second.id, SendOutcome::Ok, 1).expect("ack b");

        assert_eq!(ack_a.outcome, SendOutcome::Ok);
        assert_eq!(ack_b.outcome, SendOutcome::Ok);
    }

    #[test]
    fn retryable_failure_backs_off_and_retries() {
        let q = queue(8, 3);
        let id = q.enqueue(payload("a")).expect("enqueue");

        let item = q.peek_ready(Instant::now()).expect("dispatch");
        assert!(q.ack(item.id, SendOutcome::RetryableError, 1).is_none());

        // not ready immediately; ready once the backoff ceiling has passed
        let ceiling = BackoffPolicy::default().ceiling(1);
        let later = Instant::now() + ceiling + Duration::from_millis(1);
        let retried = q.peek_ready(later).expect("retry dispatch");
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempt_count, 2);
    }

    #[test]
    fn attempt_count_is_bounded() {
        let q = queue(8, 3);
        let _ = q.enqueue(payload("a")).expect("enqueue");
        let far_future = Instant::now() + Duration::from_secs(3600);

        let mut record = None;
        for _ in 0..10 {
            let Some(item) = q.peek_ready(far_future) else {
                break;
            };
            record = q.ack(item.id, SendOutcome::RetryableError, 1);
            if record.is_some() {
                break;
            }
        }
        let record = record.expect("item dropped with alarm");
        assert_eq!(record.attempt_count, 3);
        assert!(q.is_empty());
    }

    #[test]
    fn terminal_failure_drops_immediately() {
        let q = queue(8, 5);
        let _ = q.enqueue(payload("a")).expect("enqueue");
        let item = q.peek_ready(Instant::now()).expect("dispatch");
        let record = q.ack(item.id, SendOutcome::TerminalError, 1).expect("record");
        assert_eq!(record.outcome, SendOutcome::TerminalError);
        assert!(q.is_empty());
    }

    #[test]
    fn internal_retries_count_against_budget() {
        // the sender retried twice internally, then the third attempt won
        let q = queue(8, 3);
        let _ = q.enqueue(payload("a")).expect("enqueue");
        let item = q.peek_ready(Instant::now()).expect("dispatch");
        let record = q.ack(item.id, SendOutcome::Ok, 3).expect("record");
        assert_eq!(record.outcome, SendOutcome::Ok);
        assert_eq!(record.attempt_count, 3);
    }

    #[test]
    fn in_flight_gate_limits_dispatch() {
        let q = SendQueue::new("gated", 8, 3, 1, BackoffPolicy::default());
        let _ = q.enqueue(payload("a")).expect("enqueue");
        let _ = q.enqueue(payload("b")).expect("enqueue");
        let now = Instant::now();
        let first = q.peek_ready(now).expect("first");
        assert!(q.peek_ready(now).is_none());
        let _ = q.ack(first.id, SendOutcome::Ok, 1);
        assert!(q.peek_ready(now).is_some());
    }

    #[test]
    fn backoff_ceiling_grows_then_caps() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(policy.ceiling(0), Duration::from_millis(100));
        assert_eq!(policy.ceiling(1), Duration::from_millis(200));
        assert_eq!(policy.ceiling(10), Duration::from_secs(1));
        for attempt in 0..8 {
            assert!(policy.delay(attempt) <= policy.ceiling(attempt));
        }
    }
}
