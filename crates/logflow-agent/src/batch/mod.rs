//! Batching: per-batch status accounting and the per-sink batcher service.

pub mod batcher;
pub mod status;

pub use batcher::{Batcher, BatcherCommand, BatcherHandle, BatcherService};
pub use status::{BatchStatus, GroupBatchStatus};
