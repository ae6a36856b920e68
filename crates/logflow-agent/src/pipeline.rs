//! Pipeline assembly.
//!
//! A pipeline wires one file input through the processing rules into a
//! batcher, serializer, send queue, and HTTP sender:
//!
//! ```text
//!   reader thread (tailers, blocking I/O)
//!       │ event groups
//!       v
//!   batcher service ──> serializer task ──> send queue ──> sender service
//! ```
//!
//! Readers run on dedicated OS threads because file I/O blocks; everything
//! downstream runs on the tokio runtime. Shutdown happens in intake order:
//! readers stop and checkpoint, the batcher drains, the serializer finishes
//! enqueueing, and only then is the sender cancelled, letting in-flight
//! requests complete so their outcomes are recorded.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::{BatcherHandle, BatcherService};
use crate::config::flush_strategy::{EventFlushStrategy, GroupFlushStrategy};
use crate::config::reader_options::FileReaderOptions;
use crate::config::{AgentConfig, ConfigError, MultilineOptions, PipelineConfig};
use crate::container::ContainerInfo;
use crate::events::{Event, EventGroup, LogEvent, RawEvent};
use crate::processor::{apply_rules, compile_rules, Rule, RuleConfig};
use crate::sender::{
    compress_payload, BackoffPolicy, HttpSender, HttpSenderConfig, QueueError, SendQueue,
    SenderOptions, SenderService, TlsOptions,
};
use crate::serialize::JsonEventGroupSerializer;
use crate::tail::checkpoint::CheckpointStore;
use crate::tail::framer::{FrameMode, RecordFramer};
use crate::tail::tailer::{Tailer, TailerState};
use crate::util::GracefulThread;

/// Bytes requested from a tailer per read tick.
const READ_CHUNK_BYTES: usize = 256 * 1024;
/// Cap on a single framed record before the JSON framer gives up on balance.
const MAX_RECORD_BYTES: usize = 512 * 1024;
/// Reader idle sleep between discovery sweeps with no progress.
const READER_IDLE_SLEEP: Duration = Duration::from_millis(200);

const KEY_CONTENT: &str = "content";
const TAG_FILE_PATH: &str = "__path__";

/// Shared collaborators constructed once at daemon start.
#[derive(Clone)]
pub struct PipelineContext {
    pub agent: Arc<AgentConfig>,
    pub checkpoints: Arc<CheckpointStore>,
}

/// Parsed file input section.
struct FileInput {
    paths: Vec<String>,
    reader_opts: FileReaderOptions,
    frame_mode: FrameMode,
    container_tags: Vec<(String, String)>,
}

/// Parsed HTTP flusher section.
struct HttpFlusher {
    endpoints: Vec<String>,
    headers: Vec<(String, String)>,
    strategy: EventFlushStrategy,
    group_strategy: Option<GroupFlushStrategy>,
    compression: bool,
    tls: Option<TlsOptions>,
    follow_redirects: bool,
}

/// A validated, not-yet-running pipeline.
pub struct Pipeline {
    name: String,
    input: FileInput,
    rules: Vec<Rule>,
    flusher: HttpFlusher,
}

impl Pipeline {
    /// Resolves a pipeline config into runnable parts. Any rejected plugin
    /// keeps the whole pipeline from starting.
    pub fn build(config: &PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let input_plugin = config
            .inputs
            .iter()
            .find(|p| p.kind == "input_file")
            .ok_or_else(|| ConfigError::UnknownPlugin {
                pipeline: config.name.clone(),
                kind: config
                    .inputs
                    .first()
                    .map(|p| p.kind.clone())
                    .unwrap_or_default(),
            })?;
        let input = parse_file_input(&input_plugin.detail)?;

        let mut rules = Vec::new();
        for processor in &config.processors {
            if processor.kind == "processor_rules" {
                let configs: Vec<RuleConfig> = serde_json::from_value(
                    processor
                        .detail
                        .get("Rules")
                        .cloned()
                        .unwrap_or(Value::Array(Vec::new())),
                )
                .map_err(|e| ConfigError::InvalidParam {
                    plugin: processor.kind.clone(),
                    param: "Rules",
                    reason: e.to_string(),
                })?;
                rules.extend(compile_rules(&configs));
            } else {
                return Err(ConfigError::UnknownPlugin {
                    pipeline: config.name.clone(),
                    kind: processor.kind.clone(),
                });
            }
        }

        let flusher_plugin = config
            .flushers
            .iter()
            .find(|p| p.kind == "flusher_http")
            .ok_or_else(|| ConfigError::UnknownPlugin {
                pipeline: config.name.clone(),
                kind: config
                    .flushers
                    .first()
                    .map(|p| p.kind.clone())
                    .unwrap_or_default(),
            })?;
        let flusher = parse_http_flusher(&flusher_plugin.detail)?;

        Ok(Pipeline {
            name: config.name.clone(),
            input,
            rules,
            flusher,
        })
    }

    /// Spawns the pipeline's threads and tasks.
    pub fn start(self, ctx: &PipelineContext) -> Result<RunningPipeline, ConfigError> {
        let intake_cancel = CancellationToken::new();
        let sender_cancel = CancellationToken::new();

        let queue = Arc::new(SendQueue::new(
            self.name.clone(),
            ctx.agent.queue_capacity,
            ctx.agent.max_send_attempts,
            ctx.agent.queue_max_in_flight,
            BackoffPolicy::default(),
        ));

        let http_sender = HttpSender::new(&HttpSenderConfig {
            timeout: Duration::from_secs(ctx.agent.http_timeout_secs),
            proxy: ctx.agent.proxy.clone(),
            bind_local_address: ctx.agent.bind_address,
            resolve: ctx
                .agent
                .host_overrides
                .iter()
                .map(|(host, addr)| (host.clone(), *addr))
                .collect(),
            tls: self.flusher.tls.clone(),
            follow_redirects: self.flusher.follow_redirects,
        })
        .map_err(|e| ConfigError::InvalidParam {
            plugin: "flusher_http".to_string(),
            param: "Endpoint",
            reason: e.to_string(),
        })?;

        let compression = self.flusher.compression && ctx.agent.compression;
        let mut headers = self.flusher.headers.clone();
        headers.push((
            "User-Agent".to_string(),
            format!("logflow/{}", crate::AGENT_VERSION),
        ));
        if compression {
            headers.push(("Content-Encoding".to_string(), "zstd".to_string()));
        }
        let sender_options = SenderOptions {
            endpoints: self.flusher.endpoints.clone(),
            headers,
            max_try: crate::DEFAULT_MAX_SEND_ATTEMPTS,
            ..SenderOptions::default()
        };
        let sender_service = SenderService::new(
            Arc::clone(&queue),
            http_sender,
            sender_options,
            sender_cancel.clone(),
        );
        let sender_task = tokio::spawn(sender_service.run());

        let (group_tx, group_rx) = mpsc::channel::<EventGroup>(64);
        let (batcher_service, batcher_handle) = BatcherService::new(
            self.flusher.strategy,
            self.flusher.group_strategy,
            group_tx,
        );
        let batcher_task = tokio::spawn(batcher_service.run());

        let serializer_task = tokio::spawn(serialize_loop(
            group_rx,
            Arc::clone(&queue),
            compression,
            ctx.agent.compression_level,
            sender_cancel.clone(),
        ));

        let reader = spawn_reader(
            self.name.clone(),
            self.input,
            self.rules,
            batcher_handle.clone(),
            Arc::clone(&ctx.checkpoints),
            intake_cancel.clone(),
            Duration::from_millis(ctx.agent.stop_grace_ms),
        )?;

        let persister_task = tokio::spawn(checkpoint_persister(
            Arc::clone(&ctx.checkpoints),
            Duration::from_secs(ctx.agent.checkpoint_interval_secs.max(1)),
            intake_cancel.clone(),
        ));

        info!("pipeline {} started", self.name);
        Ok(RunningPipeline {
            name: self.name,
            intake_cancel,
            sender_cancel,
            reader,
            batcher_handle,
            queue,
            checkpoints: Arc::clone(&ctx.checkpoints),
            stop_grace: Duration::from_millis(ctx.agent.stop_grace_ms),
            tasks: vec![batcher_task, serializer_task, sender_task, persister_task],
        })
    }
}

/// Handle to a started pipeline.
pub struct RunningPipeline {
    name: String,
    intake_cancel: CancellationToken,
    sender_cancel: CancellationToken,
    reader: GracefulThread,
    batcher_handle: BatcherHandle,
    queue: Arc<SendQueue>,
    checkpoints: Arc<CheckpointStore>,
    stop_grace: Duration,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl RunningPipeline {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the pipeline: intake first, then drain, then the sender.
    pub async fn stop(mut self) {
        info!("stopping pipeline {}", self.name);
        self.intake_cancel.cancel();
        let deadline = Instant::now() + self.stop_grace;
        if !self.reader.try_join(deadline) {
            warn!("pipeline {}: reader did not stop in time", self.name);
        }

        if let Err(e) = self.batcher_handle.flush_all().await {
            warn!("pipeline {}: final flush failed: {}", self.name, e);
        }
        let _ = self.batcher_handle.shutdown();

        // give the queue a bounded chance to drain before stopping the sender
        let drain_deadline = Instant::now() + self.stop_grace;
        while !self.queue.is_empty() && Instant::now() < drain_deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        self.sender_cancel.cancel();

        for task in self.tasks.drain(..) {
            if tokio::time::timeout(self.stop_grace, task).await.is_err() {
                warn!("pipeline {}: task did not stop within grace", self.name);
            }
        }
        if let Err(e) = self.checkpoints.persist() {
            error!("pipeline {}: failed to persist checkpoints: {}", self.name, e);
        }
        info!("pipeline {} stopped", self.name);
    }
}

fn parse_file_input(detail: &Value) -> Result<FileInput, ConfigError> {
    let paths: Vec<String> = match detail.get("Paths") {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let containers = match detail.get("Containers") {
        Some(value) => ContainerInfo::parse_all(value)?,
        None => HashMap::new(),
    };
    if paths.is_empty() && containers.is_empty() {
        return Err(ConfigError::InvalidParam {
            plugin: "input_file".to_string(),
            param: "Paths",
            reason: "at least one path or container is required".to_string(),
        });
    }

    let reader_opts = FileReaderOptions::from_json(detail, "input_file")?;
    let multiline: MultilineOptions = match detail.get("Multiline") {
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidParam {
                plugin: "input_file".to_string(),
                param: "Multiline",
                reason: e.to_string(),
            })?
        }
        None => MultilineOptions::default(),
    };
    let frame_mode = multiline.to_frame_mode()?;

    let mut all_paths = paths;
    let mut container_tags = Vec::new();
    for info in containers.values() {
        if !info.log_path.is_empty() {
            all_paths.push(info.log_path.clone());
        }
        for (key, value) in &info.tags {
            container_tags.push((key.clone(), value.clone()));
        }
        for (key, value) in &info.metadatas {
            container_tags.push((key.tag_key().to_string(), value.clone()));
        }
    }

    Ok(FileInput {
        paths: all_paths,
        reader_opts,
        frame_mode,
        container_tags,
    })
}

fn parse_http_flusher(detail: &Value) -> Result<HttpFlusher, ConfigError> {
    let Some(endpoint) = detail.get("Endpoint").and_then(Value::as_str) else {
        return Err(ConfigError::InvalidParam {
            plugin: "flusher_http".to_string(),
            param: "Endpoint",
            reason: "required".to_string(),
        });
    };
    let mut endpoints = vec![endpoint.to_string()];
    if let Some(extra) = detail.get("AdditionalEndpoints").and_then(Value::as_array) {
        endpoints.extend(extra.iter().filter_map(Value::as_str).map(str::to_string));
    }

    let mut headers = Vec::new();
    if let Some(map) = detail.get("Headers").and_then(Value::as_object) {
        for (key, value) in map {
            if let Some(value) = value.as_str() {
                headers.push((key.clone(), value.to_string()));
            }
        }
    }

    let strategy: EventFlushStrategy =
        serde_json::from_value(detail.clone()).unwrap_or_default();
    let group_strategy: Option<GroupFlushStrategy> = detail
        .get("Group")
        .map(|value| serde_json::from_value(value.clone()).unwrap_or_default());
    let compression = detail
        .get("Compression")
        .and_then(Value::as_bool)
        .unwrap_or(true);
    let tls = detail.get("TLS").map(|section| TlsOptions {
        ca_file: section.get("CAFile").and_then(Value::as_str).map(PathBuf::from),
        cert_file: section
            .get("CertFile")
            .and_then(Value::as_str)
            .map(PathBuf::from),
        key_file: section.get("KeyFile").and_then(Value::as_str).map(PathBuf::from),
        insecure_skip_verify: section
            .get("InsecureSkipVerify")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    });
    let follow_redirects = detail
        .get("FollowRedirects")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(HttpFlusher {
        endpoints,
        headers,
        strategy,
        group_strategy,
        compression,
        tls,
        follow_redirects,
    })
}

#[allow(clippy::too_many_arguments)]
fn spawn_reader(
    pipeline: String,
    input: FileInput,
    rules: Vec<Rule>,
    batcher: BatcherHandle,
    checkpoints: Arc<CheckpointStore>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<GracefulThread, ConfigError> {
    GracefulThread::spawn(format!("reader-{pipeline}"), grace, move || {
        reader_loop(&pipeline, &input, &rules, &batcher, &checkpoints, &cancel);
    })
    .map_err(|e| ConfigError::InvalidParam {
        plugin: "input_file".to_string(),
        param: "Paths",
        reason: format!("failed to spawn reader thread: {e}"),
    })
}

/// The reader thread: discovers files, drives their tailers, forwards
/// framed records as event groups, and keeps checkpoints current.
fn reader_loop(
    pipeline: &str,
    input: &FileInput,
    rules: &[Rule],
    batcher: &BatcherHandle,
    checkpoints: &Arc<CheckpointStore>,
    cancel: &CancellationToken,
) {
    let mut tailers: HashMap<PathBuf, Tailer> = HashMap::new();

    while !cancel.is_cancelled() {
        let new_paths: Vec<PathBuf> = discover(&input.paths)
            .into_iter()
            .filter(|path| !tailers.contains_key(path))
            .collect();
        for path in new_paths {
            match Tailer::open(
                pipeline,
                &path,
                input.reader_opts.file_encoding,
                RecordFramer::new(input.frame_mode.clone(), MAX_RECORD_BYTES),
                input.reader_opts.clone(),
            ) {
                Ok(mut tailer) => {
                    let restored = checkpoints.get(&tailer.checkpoint_key());
                    match tailer.init(restored.as_ref()) {
                        Ok(_) => {
                            debug!("pipeline {}: tailing {:?}", pipeline, path);
                            tailers.insert(path, tailer);
                        }
                        Err(e) => warn!("pipeline {}: failed to init {:?}: {}", pipeline, path, e),
                    }
                }
                Err(e) => debug!("pipeline {}: cannot open {:?}: {}", pipeline, path, e),
            }
        }

        let mut did_work = false;
        let mut rotated = Vec::new();
        for (path, tailer) in &mut tailers {
            if cancel.is_cancelled() {
                break;
            }
            let force = !tailer.cache().is_empty()
                && tailer.idle_secs() >= u64::from(input.reader_opts.flush_timeout_secs);
            loop {
                match tailer.read_once(READ_CHUNK_BYTES, !force) {
                    Ok(outcome) => {
                        if !outcome.records.is_empty() {
                            did_work = true;
                            emit_group(pipeline, input, rules, batcher, tailer, outcome.records, outcome.range, outcome.overflowed);
                        }
                        if tailer.state() == TailerState::Rotated {
                            rotated.push(path.clone());
                            break;
                        }
                        if !outcome.more_data {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("pipeline {}: transient read error: {}", pipeline, e);
                        break;
                    }
                }
            }
            tailer.dump_meta(checkpoints);
            tailer.close_if_unused();
        }
        for path in rotated {
            if let Some(tailer) = tailers.remove(&path) {
                checkpoints.remove(&tailer.checkpoint_key());
            }
        }

        if !did_work {
            // bounded sleep keeps stop latency under the grace period
            let mut waited = Duration::ZERO;
            while waited < READER_IDLE_SLEEP && !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(50));
                waited += Duration::from_millis(50);
            }
        }
    }

    for tailer in tailers.values() {
        tailer.dump_meta(checkpoints);
    }
    debug!("pipeline {}: reader thread exiting", pipeline);
}

#[allow(clippy::too_many_arguments)]
fn emit_group(
    pipeline: &str,
    input: &FileInput,
    rules: &[Rule],
    batcher: &BatcherHandle,
    tailer: &Tailer,
    records: Vec<Vec<u8>>,
    range: (u64, u64),
    overflowed: bool,
) {
    let now = i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default(),
    )
    .unwrap_or_default();

    let mut group = EventGroup::new();
    group.set_tag(TAG_FILE_PATH, tailer.path().display().to_string());
    for (key, value) in &input.container_tags {
        group.set_tag(key.clone(), value.clone());
    }
    let metadata = group.metadata_mut();
    metadata.source_path = Some(tailer.path().display().to_string());
    metadata.offset_range = Some(range);

    let last = records.len().saturating_sub(1);
    for (index, record) in records.into_iter().enumerate() {
        if overflowed && index == last {
            // unbalanced JSON past the record cap ships unparsed
            warn!(
                "pipeline {}: record in {:?} never closed, emitting raw",
                pipeline,
                tailer.path()
            );
            let mut raw = RawEvent::new(record);
            raw.header.set_timestamp(now);
            group.push(Event::Raw(raw));
            continue;
        }
        let mut content = String::from_utf8_lossy(&record).into_owned();
        if !apply_rules(rules, &mut content) {
            continue;
        }
        let mut log = LogEvent::new();
        log.header.set_timestamp(now);
        log.set_content(KEY_CONTENT, content);
        group.push(Event::Log(log));
    }

    if !group.is_empty() && batcher.add(group).is_err() {
        error!("pipeline {}: batcher is gone, dropping records", pipeline);
    }
}

/// Expands configured paths; a `*` wildcard is supported in the file name
/// component.
fn discover(paths: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in paths {
        let path = PathBuf::from(entry);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.contains('*') {
            let Some(parent) = path.parent() else {
                continue;
            };
            let Ok(dir) = std::fs::read_dir(parent) else {
                continue;
            };
            for file in dir.flatten() {
                let file_name = file.file_name().to_string_lossy().into_owned();
                if wildcard_match(&file_name, &name) && file.path().is_file() {
                    found.push(file.path());
                }
            }
        } else if path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    found
}

/// `*`-only wildcard match.
fn wildcard_match(name: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    let Some((first, rest)) = parts.split_first() else {
        return name == pattern;
    };
    if !name.starts_with(first) {
        return false;
    }
    let mut position = first.len();
    for (index, part) in rest.iter().enumerate() {
        if part.is_empty() {
            if index == rest.len() - 1 {
                return true;
            }
            continue;
        }
        let is_last = index == rest.len() - 1;
        if is_last {
            return name.len() >= position && name[position..].ends_with(part);
        }
        match name[position..].find(part) {
            Some(at) => position += at + part.len(),
            None => return false,
        }
    }
    position == name.len()
}

/// Serializes batches and enqueues them, pausing intake on backpressure
/// until the queue drains below its low watermark.
async fn serialize_loop(
    mut rx: mpsc::Receiver<EventGroup>,
    queue: Arc<SendQueue>,
    compression: bool,
    compression_level: i32,
    cancel: CancellationToken,
) {
    let serializer = JsonEventGroupSerializer::new();
    while let Some(group) = rx.recv().await {
        let payload = match serializer.serialize(&group) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to serialize batch: {}", e);
                continue;
            }
        };
        let payload = if compression {
            compress_payload(payload, compression_level)
        } else {
            payload
        };
        let payload = Bytes::from(payload);
        loop {
            match queue.enqueue(payload.clone()) {
                Ok(_) => break,
                Err(QueueError::QueueFull) => {
                    if cancel.is_cancelled() {
                        warn!("dropping batch for {}: queue full at shutdown", queue.sink());
                        break;
                    }
                    while !queue.below_low_water() && !cancel.is_cancelled() {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
    debug!("serializer for sink {} exiting", queue.sink());
}

/// Periodically fsyncs the checkpoint store.
async fn checkpoint_persister(
    checkpoints: Arc<CheckpointStore>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = checkpoints.persist() {
                    error!("failed to persist checkpoints: {}", e);
                }
            }
            () = cancel.cancelled() => break,
        }
    }
    if let Err(e) = checkpoints.persist() {
        error!("failed to persist checkpoints at shutdown: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_matching() {
        assert!(wildcard_match("app.log", "*.log"));
        assert!(wildcard_match("app.log", "app.*"));
        assert!(wildcard_match("app-2024.log", "app-*.log"));
        assert!(wildcard_match("app.log", "app.log"));
        assert!(!wildcard_match("app.txt", "*.log"));
        assert!(!wildcard_match("other.log.gz", "*.log"));
    }

    #[test]
    fn build_accepts_minimal_pipeline() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "name": "app",
            "inputs": [{"Type": "input_file", "detail": {"Paths": ["/var/log/app.log"]}}],
            "flushers": [{"Type": "flusher_http", "detail": {"Endpoint": "https://intake/logs"}}]
        }))
        .expect("parse");
        assert!(Pipeline::build(&config).is_ok());
    }

    #[test]
    fn build_rejects_unknown_processor() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "name": "app",
            "inputs": [{"Type": "input_file", "detail": {"Paths": ["/var/log/app.log"]}}],
            "processors": [{"Type": "processor_mystery", "detail": {}}],
            "flushers": [{"Type": "flusher_http", "detail": {"Endpoint": "https://intake/logs"}}]
        }))
        .expect("parse");
        assert!(Pipeline::build(&config).is_err());
    }

    #[test]
    fn build_rejects_flusher_without_endpoint() {
        let config: PipelineConfig = serde_json::from_value(json!({
            "name": "app",
            "inputs": [{"Type": "input_file", "detail": {"Paths": ["/var/log/app.log"]}}],
            "flushers": [{"Type": "flusher_http", "detail": {}}]
        }))
        .expect("parse");
        assert!(Pipeline::build(&config).is_err());
    }

    #[test]
    fn flusher_parses_strategy_and_endpoints() {
        let flusher = parse_http_flusher(&json!({
            "Endpoint": "https://intake/logs",
            "AdditionalEndpoints": ["https://mirror/logs"],
            "Headers": {"X-Token": "abc"},
            "MinCnt": 100,
            "TimeoutSecs": 2,
            "Group": {"MinSizeBytes": 1024, "TimeoutSecs": 1}
        }))
        .expect("parse");
        assert_eq!(flusher.endpoints.len(), 2);
        assert_eq!(flusher.strategy.min_count, 100);
        assert_eq!(flusher.headers, vec![("X-Token".to_string(), "abc".to_string())]);
        let group = flusher.group_strategy.expect("group strategy");
        assert_eq!(group.min_size_bytes, 1024);
    }

    #[test]
    fn file_input_requires_paths_or_containers() {
        assert!(parse_file_input(&json!({})).is_err());
        assert!(parse_file_input(&json!({"Paths": ["/tmp/x.log"]})).is_ok());
    }

    #[test]
    fn container_log_paths_join_discovery() {
        let input = parse_file_input(&json!({
            "Containers": [{
                "ID": "c1",
                "LogPath": "/var/lib/docker/containers/c1/c1-json.log",
                "MetaDatas": ["_container_name_", "app"],
                "Tags": ["env", "prod"]
            }]
        }))
        .expect("parse");
        assert_eq!(input.paths, vec!["/var/lib/docker/containers/c1/c1-json.log"]);
        assert!(input
            .container_tags
            .contains(&("_container_name_".to_string(), "app".to_string())));
        assert!(input.container_tags.contains(&("env".to_string(), "prod".to_string())));
    }
}
