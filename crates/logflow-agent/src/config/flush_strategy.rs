//! Flush strategies for event batching.
//!
//! A flush strategy decides when an in-progress batch is full. Predicates
//! are evaluated in a fixed order after each event addition:
//!
//! 1. `size_reaching_upper_limit` — flush immediately; a payload is never
//!    split mid-event, so the result may exceed the limit only when a single
//!    event is itself oversized.
//! 2. `need_flush_by_size` — the soft size floor was reached.
//! 3. `need_flush_by_count` — the event count floor was reached.
//! 4. `need_flush_by_time` — evaluated *before* adding a new event.
//!
//! Metric batches additionally flush when an incoming sample's timestamp is
//! more than 300 seconds away from the batch creation time (cAdvisor-style
//! out-of-order tolerance) or crosses a minute boundary, aligning batches to
//! metric aggregation windows.

use serde::Deserialize;

use crate::batch::status::{BatchStatus, GroupBatchStatus};
use crate::events::Event;

/// Seconds of timestamp skew tolerated inside one metric batch.
const METRIC_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Per-sink flush strategy.
///
/// Deserializes from the flusher `detail` keys
/// `{MaxSizeBytes, MinSizeBytes, MinCnt, TimeoutSecs}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventFlushStrategy {
    #[serde(rename = "MaxSizeBytes")]
    pub max_size_bytes: u64,
    #[serde(rename = "MinSizeBytes")]
    pub min_size_bytes: u64,
    #[serde(rename = "MinCnt")]
    pub min_count: u64,
    #[serde(rename = "TimeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for EventFlushStrategy {
    fn default() -> Self {
        EventFlushStrategy {
            max_size_bytes: u64::MAX,
            min_size_bytes: 512 * 1024,
            min_count: 4096,
            timeout_secs: 3,
        }
    }
}

impl EventFlushStrategy {
    /// Called after an event is added.
    #[must_use]
    pub fn need_flush_by_size(&self, status: &BatchStatus) -> bool {
        self.min_size_bytes > 0 && status.size_bytes() >= self.min_size_bytes
    }

    /// Called after an event is added. A count of zero disables the
    /// predicate; the comparison is `>=` so a batch that skips past the
    /// threshold still flushes.
    #[must_use]
    pub fn need_flush_by_count(&self, status: &BatchStatus) -> bool {
        self.min_count > 0 && status.event_count() >= self.min_count
    }

    /// Called before `event` is added to the batch described by `status`.
    #[must_use]
    pub fn need_flush_by_time(&self, status: &BatchStatus, event: &Event, now_secs: i64) -> bool {
        if status.event_count() == 0 {
            return false;
        }
        let timed_out = now_secs - status.create_time_secs() >= self.timeout_secs as i64;
        if !event.is_metric() {
            return timed_out;
        }
        timed_out
            || (status.create_time_secs() - event.timestamp_secs()).abs()
                > METRIC_TIMESTAMP_TOLERANCE_SECS
            || status.create_time_minute() != event.timestamp_secs() / 60
    }

    /// Called after an event is added; flushing at this point may exceed the
    /// limit because events are never split.
    #[must_use]
    pub fn size_reaching_upper_limit(&self, status: &BatchStatus) -> bool {
        status.size_bytes() >= self.max_size_bytes
    }
}

/// Group-level strategy gating how long flushed batches linger before being
/// released downstream. Group flush precedes sink flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GroupFlushStrategy {
    #[serde(rename = "MinSizeBytes")]
    pub min_size_bytes: u64,
    #[serde(rename = "TimeoutSecs")]
    pub timeout_secs: u64,
}

impl Default for GroupFlushStrategy {
    fn default() -> Self {
        GroupFlushStrategy {
            min_size_bytes: 256 * 1024,
            timeout_secs: 1,
        }
    }
}

impl GroupFlushStrategy {
    #[must_use]
    pub fn need_flush_by_size(&self, status: &GroupBatchStatus) -> bool {
        status.size_bytes() >= self.min_size_bytes
    }

    #[must_use]
    pub fn need_flush_by_time(&self, status: &GroupBatchStatus, now_secs: i64) -> bool {
        now_secs - status.create_time_secs() >= self.timeout_secs as i64
    }
}
