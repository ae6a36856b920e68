//! # logflow-agent
//!
//! Core library of the logflow collection agent: a long-running daemon that
//! tails log files on disk, decodes and frames their bytes into structured
//! events, batches those events per sink, and ships serialized batches to
//! HTTP endpoints with retries.
//!
//! ## Overview
//!
//! Data flows through the library in one direction:
//!
//! ```text
//!   tail (reader + framer)
//!       │
//!       v
//!   events (tagged variants, grouped)
//!       │
//!       v
//!   batch (flush strategy, per-sink batching)
//!       │
//!       v
//!   serialize (NDJSON)
//!       │
//!       v
//!   sender (bounded queue -> retrying HTTP client)
//! ```
//!
//! ## Architecture
//!
//! - [`tail`]: file discovery state, byte source, encoding normalization,
//!   record framing, checkpointing
//! - [`events`]: the pipeline event model (Log, Metric, Span, Raw) and
//!   event groups
//! - [`batch`]: batch status accounting and the per-sink batcher service
//! - [`serialize`]: event-group serialization for sinks
//! - [`sender`]: send queue with backoff, network error taxonomy, HTTP client
//! - [`config`]: pipeline and reader configuration with lenient parsing
//! - [`pipeline`]: assembly of the above into a running pipeline

#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

/// Batch status accounting and the per-sink batcher service
pub mod batch;

/// Configuration management: pipeline layout, reader options, flush strategy
pub mod config;

/// Container-runtime metadata injection
pub mod container;

/// Pipeline event model: tagged variants and event groups
pub mod events;

/// Logging infrastructure and tracing setup
pub mod logger;

/// Pipeline assembly: readers, batcher, sender, checkpoint persister
pub mod pipeline;

/// Processing rules applied between framing and batching
pub mod processor;

/// Event-group serialization for sinks
pub mod serialize;

/// Send queue, network error taxonomy, and the HTTP sender
pub mod sender;

/// File tailing: byte source, encoding, framing, tailer, checkpoints
pub mod tail;

/// Small shared utilities (thread wrapper)
pub mod util;

/// Default number of delivery attempts per send item before the queue drops
/// it and raises an alarm.
pub(crate) const DEFAULT_MAX_SEND_ATTEMPTS: u32 = 3;

/// Agent version reported in the `User-Agent` header of outbound requests.
pub const AGENT_VERSION: &str = "0.3.1";
