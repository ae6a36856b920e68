//! Batch status counters.
//!
//! A status tracks the size, count, and age of one in-progress batch. The
//! creation minute is kept alongside the creation time so metric batches can
//! align to minute-granularity aggregation windows without re-dividing on
//! every predicate check.

/// Counters for one in-progress event batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStatus {
    size_bytes: u64,
    event_count: u64,
    create_time_secs: i64,
    create_time_minute: i64,
}

impl BatchStatus {
    #[must_use]
    pub fn new(now_secs: i64) -> Self {
        BatchStatus {
            size_bytes: 0,
            event_count: 0,
            create_time_secs: now_secs,
            create_time_minute: now_secs / 60,
        }
    }

    /// Accounts one added event of `event_size` bytes.
    pub fn update(&mut self, event_size: u64) {
        self.size_bytes += event_size;
        self.event_count += 1;
    }

    pub fn reset(&mut self, now_secs: i64) {
        *self = BatchStatus::new(now_secs);
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    #[must_use]
    pub fn create_time_secs(&self) -> i64 {
        self.create_time_secs
    }

    #[must_use]
    pub fn create_time_minute(&self) -> i64 {
        self.create_time_minute
    }
}

/// Counters for the group-level accumulation stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupBatchStatus {
    size_bytes: u64,
    create_time_secs: i64,
}

impl GroupBatchStatus {
    #[must_use]
    pub fn new(now_secs: i64) -> Self {
        GroupBatchStatus {
            size_bytes: 0,
            create_time_secs: now_secs,
        }
    }

    pub fn update(&mut self, group_size: u64) {
        self.size_bytes += group_size;
    }

    pub fn reset(&mut self, now_secs: i64) {
        *self = GroupBatchStatus::new(now_secs);
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[must_use]
    pub fn create_time_secs(&self) -> i64 {
        self.create_time_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_accumulates_size_and_count() {
        let mut status = BatchStatus::new(120);
        status.update(10);
        status.update(32);
        assert_eq!(status.size_bytes(), 42);
        assert_eq!(status.event_count(), 2);
        assert_eq!(status.create_time_secs(), 120);
        assert_eq!(status.create_time_minute(), 2);
    }

    #[test]
    fn reset_restamps_creation_time() {
        let mut status = BatchStatus::new(60);
        status.update(10);
        status.reset(180);
        assert_eq!(status.size_bytes(), 0);
        assert_eq!(status.event_count(), 0);
        assert_eq!(status.create_time_minute(), 3);
    }
}
