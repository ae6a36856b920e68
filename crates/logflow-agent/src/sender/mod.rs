//! Batch delivery.
//!
//! The sender service drives the per-sink [`queue::SendQueue`] through the
//! [`http::HttpSender`]: each poll iteration dispatches every ready item as
//! its own in-flight task on a bounded set, completions are acknowledged
//! back into the queue, and the queue's backoff schedule decides when a
//! failed batch is seen again. On shutdown, dispatching stops but in-flight
//! requests run to completion so final outcomes are recorded.

pub mod http;
pub mod queue;

pub use http::{classify, network_code, HttpResult, HttpSender, HttpSenderConfig, NetworkCode,
    SendRequest, TlsOptions};
pub use queue::{AckRecord, BackoffPolicy, DispatchedItem, ItemId, QueueError, SendOutcome,
    SendQueue};

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Delivery options for one sink.
#[derive(Clone, Debug)]
pub struct SenderOptions {
    /// Target endpoints; every batch is shipped to all of them, the first
    /// one decides the ack outcome.
    pub endpoints: Vec<String>,
    pub method: String,
    pub headers: Vec<(String, String)>,
    /// Immediate transport-level retries per dispatch.
    pub max_try: u32,
    /// Queue poll cadence; the driver never waits longer than this.
    pub poll_interval: Duration,
}

impl Default for SenderOptions {
    fn default() -> Self {
        SenderOptions {
            endpoints: Vec::new(),
            method: "POST".to_string(),
            headers: vec![("Content-Type".to_string(), "application/x-ndjson".to_string())],
            max_try: crate::DEFAULT_MAX_SEND_ATTEMPTS,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Compresses a serialized batch with zstd. Returns the input on encoder
/// failure so a compression hiccup never loses a batch.
#[must_use]
pub fn compress_payload(payload: Vec<u8>, level: i32) -> Vec<u8> {
    let mut encoder = match zstd::stream::write::Encoder::new(Vec::new(), level) {
        Ok(encoder) => encoder,
        Err(e) => {
            warn!("failed to create zstd encoder: {}", e);
            return payload;
        }
    };
    if let Err(e) = encoder.write_all(&payload) {
        warn!("failed to compress batch: {}", e);
        return payload;
    }
    match encoder.finish() {
        Ok(compressed) => compressed,
        Err(e) => {
            warn!("failed to finish compressing batch: {}", e);
            payload
        }
    }
}

/// Drives one sink's queue through the HTTP sender.
pub struct SenderService {
    queue: Arc<SendQueue>,
    sender: HttpSender,
    options: SenderOptions,
    cancel: CancellationToken,
}

impl SenderService {
    #[must_use]
    pub fn new(
        queue: Arc<SendQueue>,
        sender: HttpSender,
        options: SenderOptions,
        cancel: CancellationToken,
    ) -> Self {
        SenderService {
            queue,
            sender,
            options,
            cancel,
        }
    }

    /// Runs until cancellation. In-flight requests continue to completion
    /// (or timeout) after the stop signal so the queue records their final
    /// outcomes.
    pub async fn run(self) {
        debug!("sender service for sink {} started", self.queue.sink());
        let mut in_flight: JoinSet<(ItemId, HttpResult)> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_ready(&mut in_flight);
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.record(joined);
                }
                () = self.cancel.cancelled() => {
                    break;
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            self.record(joined);
        }
        debug!("sender service for sink {} stopped", self.queue.sink());
    }

    fn dispatch_ready(&self, in_flight: &mut JoinSet<(ItemId, HttpResult)>) {
        let now = Instant::now();
        while let Some(item) = self.queue.peek_ready(now) {
            let sender = self.sender.clone();
            let options = self.options.clone();
            in_flight.spawn(async move {
                let result = deliver(&sender, &options, &item).await;
                (item.id, result)
            });
        }
    }

    fn record(&self, joined: Result<(ItemId, HttpResult), tokio::task::JoinError>) {
        match joined {
            Ok((id, result)) => {
                let outcome = result.outcome();
                if outcome != SendOutcome::Ok {
                    warn!(
                        "sink {}: delivery of batch {} failed ({:?}, status {:?}): {}",
                        self.queue.sink(),
                        id,
                        result.code,
                        result.status,
                        result.error.as_deref().unwrap_or("-")
                    );
                }
                let _ = self.queue.ack(id, outcome, result.attempts);
            }
            Err(e) => {
                error!("sink {}: delivery task failed: {}", self.queue.sink(), e);
            }
        }
    }
}

/// Ships one item to every endpoint. The first endpoint's result is the ack
/// outcome; additional endpoints are best-effort mirrors.
async fn deliver(sender: &HttpSender, options: &SenderOptions, item: &DispatchedItem) -> HttpResult {
    let requests: Vec<SendRequest> = options
        .endpoints
        .iter()
        .map(|endpoint| SendRequest {
            method: options.method.clone(),
            url: endpoint.clone(),
            headers: options.headers.clone(),
            body: item.payload.clone(),
        })
        .collect();

    let Some((primary, mirrors)) = requests.split_first() else {
        return HttpResult {
            code: NetworkCode::Other,
            status: None,
            body: bytes::Bytes::new(),
            error: Some("sink has no endpoints".to_string()),
            attempts: 1,
        };
    };

    let primary_send = sender.send_with_retry(primary, options.max_try);
    let mirror_sends = join_all(
        mirrors
            .iter()
            .map(|request| sender.send_with_retry(request, options.max_try)),
    );
    let (primary_result, mirror_results) = tokio::join!(primary_send, mirror_sends);

    for (request, result) in mirrors.iter().zip(mirror_results) {
        if result.outcome() != SendOutcome::Ok {
            warn!(
                "mirror endpoint {} rejected batch ({:?}, status {:?})",
                request.url, result.code, result.status
            );
        }
    }
    primary_result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_round_trips() {
        let payload = br#"{"content":"line"}\n"#.repeat(64);
        let compressed = compress_payload(payload.clone(), 3);
        assert!(compressed.len() < payload.len());
        let restored = zstd::stream::decode_all(&compressed[..]).expect("decode");
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn service_stops_on_cancel() {
        let queue = Arc::new(SendQueue::new("s", 8, 3, 4, BackoffPolicy::default()));
        let sender = HttpSender::new(&HttpSenderConfig::default()).expect("sender");
        let cancel = CancellationToken::new();
        let service = SenderService::new(
            Arc::clone(&queue),
            sender,
            SenderOptions::default(),
            cancel.clone(),
        );
        let task = tokio::spawn(service.run());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("service exits promptly")
            .expect("no panic");
    }
}
