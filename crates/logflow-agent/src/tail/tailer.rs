//! Per-file tailer state machine.
//!
//! A [`Tailer`] owns the byte source, encoding normalization, record framer,
//! and carry-cache for one file, and drives them through
//! `Discovered -> Opened -> Reading <-> Idle -> Rotated -> Closed`. It
//! detects rotation and truncation by `(inode, signature)` mismatch,
//! tolerates sparse holes, force-flushes the cache when a terminator never
//! arrives, and persists/restores its position through the checkpoint store.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::config::reader_options::FileReaderOptions;
use crate::tail::checkpoint::{CheckpointRecord, CheckpointStore};
use crate::tail::encoding::{align_last_character, decode_to_utf8, FileEncoding};
use crate::tail::framer::RecordFramer;
use crate::tail::source::{DevInode, FileSignature, FileSource};

/// Default carry-cache capacity. A record longer than this is released at a
/// character boundary to bound memory.
pub const DEFAULT_BUFFER_SIZE: usize = 512 * 1024;

/// Lifecycle state of a tailer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TailerState {
    Discovered,
    Opened,
    Reading,
    Idle,
    Rotated,
    Closed,
}

/// Errors surfaced by a read tick. Transient I/O errors leave the tailer
/// state untouched; the caller retries on the next tick.
#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("transient io error on {path:?}: {source}")]
    TransientIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of one `read_once` tick.
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete records emitted by this tick, in on-disk byte order.
    pub records: Vec<Vec<u8>>,
    /// More bytes are already available; schedule an immediate follow-up.
    pub more_data: bool,
    /// File offset range `[start, end)` consumed by this tick.
    pub range: (u64, u64),
    /// A JSON record overflowed the record cap and was emitted unparsed.
    pub overflowed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rotation {
    None,
    Truncated,
    Replaced,
}

/// Per-file controller combining source, normalizer, framer, and cache.
#[derive(Debug)]
pub struct Tailer {
    config_name: String,
    source: FileSource,
    dev_inode: DevInode,
    framer: RecordFramer,
    encoding: FileEncoding,
    opts: FileReaderOptions,
    buffer_size: usize,

    offset: u64,
    cache: Vec<u8>,
    signature: FileSignature,
    state: TailerState,
    last_force_read: bool,
    last_read_time: u64,
    last_delay_alert: Option<Instant>,
    last_decode_warn: Option<Instant>,
}

impl Tailer {
    /// Opens a tailer on `path`. The starting offset is decided by
    /// [`Tailer::init`].
    pub fn open(
        config_name: impl Into<String>,
        path: impl AsRef<Path>,
        encoding: FileEncoding,
        framer: RecordFramer,
        opts: FileReaderOptions,
    ) -> io::Result<Self> {
        let mut source = FileSource::open(path.as_ref())?;
        let signature = source.signature()?;
        let dev_inode = source.dev_inode();
        Ok(Tailer {
            config_name: config_name.into(),
            source,
            dev_inode,
            framer,
            encoding,
            opts,
            buffer_size: DEFAULT_BUFFER_SIZE,
            offset: 0,
            cache: Vec::new(),
            signature,
            state: TailerState::Opened,
            last_force_read: false,
            last_read_time: unix_now(),
            last_delay_alert: None,
            last_decode_warn: None,
        })
    }

    /// Overrides the carry-cache capacity (tests and tuning).
    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size.max(16);
    }

    /// Decides the starting position: restore from a matching checkpoint,
    /// otherwise start from the beginning, or from `size - TailSizeKB` for a
    /// large first-seen file (aligned forward to the next line).
    pub fn init(&mut self, checkpoint: Option<&CheckpointRecord>) -> io::Result<bool> {
        if let Some(cp) = checkpoint {
            if cp.dev_inode == self.dev_inode
                && cp.encoding == self.encoding
                && cp.mode == self.framer.mode().kind()
                && self.signature_matches(cp.signature)?
            {
                self.offset = cp.offset;
                self.cache = cp.cache.clone();
                self.signature = cp.signature;
                self.last_read_time = cp.last_read_time;
                debug!(
                    "restored checkpoint for {:?} at offset {}",
                    self.source.path(),
                    self.offset
                );
                return Ok(true);
            }
        }
        let size = self.source.size()?;
        let tail_limit = u64::from(self.opts.tail_size_kb) * 1024;
        if tail_limit > 0 && size > tail_limit {
            self.offset = self.align_to_next_line(size - tail_limit)?;
        } else {
            self.offset = 0;
        }
        Ok(false)
    }

    #[must_use]
    pub fn state(&self) -> TailerState {
        self.state
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub fn cache(&self) -> &[u8] {
        &self.cache
    }

    #[must_use]
    pub fn last_force_read(&self) -> bool {
        self.last_force_read
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.source.path()
    }

    #[must_use]
    pub fn checkpoint_key(&self) -> String {
        CheckpointStore::key(&self.config_name, self.dev_inode, self.source.path())
    }

    /// Seconds since the last tick that consumed bytes.
    #[must_use]
    pub fn idle_secs(&self) -> u64 {
        unix_now().saturating_sub(self.last_read_time)
    }

    /// Performs one read tick: read up to `max_bytes`, normalize encoding,
    /// frame records, advance the persisted offset.
    ///
    /// With `allow_rollback` set, an unterminated tail stays in the cache;
    /// without it (a forced flush after the flush timeout) the cache is
    /// emitted as one synthetic record and `last_force_read` is set.
    pub fn read_once(&mut self, max_bytes: usize, allow_rollback: bool) -> Result<ReadOutcome, TailError> {
        if self.state == TailerState::Closed || self.state == TailerState::Rotated {
            return Ok(ReadOutcome::default());
        }
        self.ensure_open()?;
        if self.state == TailerState::Rotated {
            return Ok(self.finalize_rotated());
        }

        match self.detect_rotation().map_err(|e| self.transient(e))? {
            Rotation::Replaced => return Ok(self.finalize_rotated()),
            Rotation::Truncated => {
                warn!("file {:?} truncated, restarting from origin", self.source.path());
                let mut outcome = ReadOutcome::default();
                self.flush_cache_into(&mut outcome.records);
                self.offset = 0;
                self.signature = self.source.signature().map_err(|e| self.transient(e))?;
                outcome.more_data = true;
                return Ok(outcome);
            }
            Rotation::None => {}
        }

        let size = self.source.size().map_err(|e| self.transient(e))?;
        self.apply_read_delay_policy(size);

        let start_offset = self.offset;
        let pending = usize::try_from(size.saturating_sub(self.offset)).unwrap_or(usize::MAX);
        let room = self.buffer_size.saturating_sub(self.cache.len());
        let want = max_bytes.min(room).min(pending);

        let mut consumed = 0usize;
        if want > 0 {
            let mut raw = vec![0u8; want];
            let n = self
                .source
                .read_at(self.offset, &mut raw)
                .map_err(|e| self.transient(e))?;
            raw.truncate(n);
            if n > 0 {
                let transcoded = decode_to_utf8(&raw, self.encoding);
                consumed = transcoded.consumed;
                if transcoded.had_errors {
                    self.warn_decode_errors();
                }
                self.offset += consumed as u64;
                self.cache.extend_from_slice(&transcoded.utf8);
                self.last_read_time = unix_now();
            }
        }

        let mut outcome = ReadOutcome {
            range: (start_offset, self.offset),
            ..ReadOutcome::default()
        };

        let framed = self.framer.extract(&self.cache, true);
        let normal_records_empty = framed.records.is_empty();
        outcome.records = framed.records;
        outcome.overflowed = framed.overflowed;
        let drop_len = self.cache.len() - framed.carry;
        self.cache.drain(..drop_len);

        if !allow_rollback && !self.cache.is_empty() {
            self.flush_cache_into(&mut outcome.records);
            self.last_force_read = normal_records_empty;
        } else {
            self.last_force_read = false;
        }

        // Cache saturated without a terminator: release a character-aligned
        // prefix and schedule an immediate follow-up read.
        if outcome.records.is_empty() && self.cache.len() >= self.buffer_size {
            let aligned = align_last_character(&self.cache, self.cache.len(), FileEncoding::Utf8);
            if aligned > 0 {
                if let Some(record) = crate::tail::framer::trim_hole(&self.cache[..aligned]) {
                    outcome.records.push(record);
                }
                self.cache.drain(..aligned);
                outcome.more_data = true;
            }
        }

        // A tick that could not consume a single character is waiting for
        // the writer to complete a multi-byte sequence; re-polling
        // immediately would spin.
        let stalled = want > 0 && consumed == 0;
        if self.offset < size && !stalled {
            outcome.more_data = true;
        }
        self.state = if outcome.records.is_empty() && self.offset >= size {
            TailerState::Idle
        } else {
            TailerState::Reading
        };
        Ok(outcome)
    }

    /// Persists the tailer state into the checkpoint store.
    pub fn dump_meta(&self, store: &CheckpointStore) {
        store.update(
            self.checkpoint_key(),
            CheckpointRecord {
                dev_inode: self.dev_inode,
                offset: self.offset,
                signature: self.signature,
                cache: self.cache.clone(),
                encoding: self.encoding,
                mode: self.framer.mode().kind(),
                last_read_time: self.last_read_time,
            },
        );
    }

    /// Closes the file handle of a tailer that has been idle longer than the
    /// configured interval. The tailer stays restorable: the next tick
    /// reopens the path and verifies identity.
    pub fn close_if_unused(&mut self) -> bool {
        if self.state == TailerState::Idle
            && self.source.is_open()
            && self.idle_secs() >= u64::from(self.opts.close_unused_reader_interval_secs)
        {
            debug!("closing unused reader for {:?}", self.source.path());
            self.source.close();
            return true;
        }
        false
    }

    /// Force-flushes the cache and closes the tailer.
    pub fn finalize(&mut self) -> Vec<Vec<u8>> {
        let mut records = Vec::new();
        self.flush_cache_into(&mut records);
        self.source.close();
        self.state = TailerState::Closed;
        records
    }

    fn finalize_rotated(&mut self) -> ReadOutcome {
        debug!("file {:?} was rotated, finalizing reader", self.source.path());
        let mut outcome = ReadOutcome::default();
        self.flush_cache_into(&mut outcome.records);
        self.source.close();
        self.state = TailerState::Rotated;
        outcome
    }

    fn flush_cache_into(&mut self, records: &mut Vec<Vec<u8>>) {
        if let Some(record) = crate::tail::framer::trim_hole(&self.cache) {
            records.push(record);
        }
        self.cache.clear();
    }

    fn ensure_open(&mut self) -> Result<(), TailError> {
        if self.source.is_open() {
            return Ok(());
        }
        match self.source.reopen() {
            Ok(()) => {
                if self.source.dev_inode() != self.dev_inode {
                    self.state = TailerState::Rotated;
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.state = TailerState::Rotated;
                Ok(())
            }
            Err(e) => Err(self.transient(e)),
        }
    }

    fn detect_rotation(&mut self) -> io::Result<Rotation> {
        if !self.source.path_identity_matches()? {
            return Ok(Rotation::Replaced);
        }
        if !self.signature.is_empty() && !self.signature_matches(self.signature)? {
            return Ok(Rotation::Truncated);
        }
        if self.signature.is_empty() {
            self.signature = self.source.signature()?;
        }
        Ok(Rotation::None)
    }

    fn signature_matches(&mut self, expected: FileSignature) -> io::Result<bool> {
        if expected.is_empty() {
            return Ok(true);
        }
        let size = self.source.size()?;
        if size < u64::from(expected.len) {
            return Ok(false);
        }
        let mut prefix = vec![0u8; expected.len as usize];
        let got = self.source.read_at(0, &mut prefix)?;
        prefix.truncate(got);
        Ok(FileSignature::compute(&prefix) == expected)
    }

    fn align_to_next_line(&mut self, from: u64) -> io::Result<u64> {
        let mut probe = vec![0u8; 8 * 1024];
        let n = self.source.read_at(from, &mut probe)?;
        probe.truncate(n);
        match probe.iter().position(|&b| b == b'\n') {
            Some(nl) => Ok(from + nl as u64 + 1),
            None => Ok(from),
        }
    }

    fn apply_read_delay_policy(&mut self, size: u64) {
        let pending = size.saturating_sub(self.offset);
        let alert = self.opts.read_delay_alert_threshold_bytes;
        if alert > 0 && pending > alert {
            let throttled = self
                .last_delay_alert
                .is_some_and(|at| at.elapsed().as_secs() < 1);
            if !throttled {
                warn!(
                    "reader for {:?} is {} bytes behind the file end",
                    self.source.path(),
                    pending
                );
                self.last_delay_alert = Some(Instant::now());
            }
        }
        let skip = self.opts.read_delay_skip_threshold_bytes;
        if skip > 0 && pending > skip {
            warn!(
                "reader for {:?} fell {} bytes behind, skipping ahead and discarding backlog",
                self.source.path(),
                pending
            );
            self.offset = size - skip;
            self.cache.clear();
        }
    }

    fn warn_decode_errors(&mut self) {
        let throttled = self
            .last_decode_warn
            .is_some_and(|at| at.elapsed().as_secs() < 1);
        if !throttled {
            warn!(
                "malformed {:?} input in {:?} replaced with U+FFFD",
                self.encoding,
                self.source.path()
            );
            self.last_decode_warn = Some(Instant::now());
        }
    }

    fn transient(&self, source: io::Error) -> TailError {
        TailError::TransientIo {
            path: self.source.path().to_path_buf(),
            source,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tail::framer::FrameMode;
    use std::io::Write;

    fn write_file(path: &Path, content: &[u8]) {
        let mut f = std::fs::File::create(path).expect("create");
        f.write_all(content).expect("write");
    }

    fn append_file(path: &Path, content: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open for append");
        f.write_all(content).expect("append");
    }

    fn line_tailer(path: &Path) -> Tailer {
        let mut tailer = Tailer::open(
            "test-config",
            path,
            FileEncoding::Utf8,
            RecordFramer::new(FrameMode::SingleLine, 512 * 1024),
            FileReaderOptions::default(),
        )
        .expect("open tailer");
        tailer.init(None).expect("init");
        tailer
    }

    #[test]
    fn single_record_advances_offset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        write_file(&path, b"logflow for observability\n");

        let mut tailer = line_tailer(&path);
        let out = tailer.read_once(1024, true).expect("read");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0], b"logflow for observability");
        assert_eq!(tailer.offset(), 26);
        assert_eq!(out.range, (0, 26));
    }

    #[test]
    fn partial_line_waits_then_forced_flush() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        write_file(&path, b"no terminator yet");

        let mut tailer = line_tailer(&path);
        let out = tailer.read_once(1024, true).expect("read");
        assert!(out.records.is_empty());
        assert_eq!(tailer.cache(), b"no terminator yet");
        assert!(!tailer.last_force_read());

        let out = tailer.read_once(1024, false).expect("forced read");
        assert_eq!(out.records, vec![b"no terminator yet".to_vec()]);
        assert!(tailer.cache().is_empty());
        assert!(tailer.last_force_read());
    }

    #[test]
    fn forced_flush_flag_clears_on_normal_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        write_file(&path, b"partial");

        let mut tailer = line_tailer(&path);
        let _ = tailer.read_once(1024, false).expect("forced");
        assert!(tailer.last_force_read());

        append_file(&path, b"\nnext line\n");
        let out = tailer.read_once(1024, true).expect("read");
        assert!(!tailer.last_force_read());
        // the leading "\n" closes an empty record which is dropped
        assert_eq!(out.records, vec![b"next line".to_vec()]);
    }

    #[test]
    fn gbk_read_transcodes_and_advances_by_raw_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gbk.log");
        // "为可观测场景而" in GBK, newline-terminated
        let mut content = b"\xce\xaa\xbf\xc9\xb9\xdb\xb2\xe2\xb3\xa1\xbe\xb0\xb6\xf8".to_vec();
        content.push(b'\n');
        write_file(&path, &content);

        let mut tailer = Tailer::open(
            "test-config",
            &path,
            FileEncoding::Gbk,
            RecordFramer::new(FrameMode::SingleLine, 512 * 1024),
            FileReaderOptions::default(),
        )
        .expect("open");
        tailer.init(None).expect("init");

        let out = tailer.read_once(1024, true).expect("read");
        assert_eq!(out.records, vec!["为可观测场景而".as_bytes().to_vec()]);
        assert_eq!(tailer.offset(), content.len() as u64);
    }

    #[test]
    fn gbk_partial_character_left_for_next_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gbk.log");
        let full = b"\xce\xaa\xbf\xc9\n";
        write_file(&path, full);

        let mut tailer = Tailer::open(
            "test-config",
            &path,
            FileEncoding::Gbk,
            RecordFramer::new(FrameMode::SingleLine, 512 * 1024),
            FileReaderOptions::default(),
        )
        .expect("open");
        tailer.init(None).expect("init");

        // 3-byte read splits the second character; only 2 bytes consumed
        let out = tailer.read_once(3, true).expect("read");
        assert!(out.records.is_empty());
        assert_eq!(tailer.offset(), 2);
        assert!(out.more_data);

        let out = tailer.read_once(1024, true).expect("read rest");
        assert_eq!(out.records, vec!["为可".as_bytes().to_vec()]);
        assert_eq!(tailer.offset(), full.len() as u64);
    }

    #[test]
    fn checkpoint_restore_reproduces_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        write_file(&path, b"first line\nsecond partial");

        let store = CheckpointStore::load(dir.path().join("cp.json"));
        let mut tailer1 = line_tailer(&path);
        let out1 = tailer1.read_once(1024, true).expect("read");
        assert_eq!(out1.records, vec![b"first line".to_vec()]);
        tailer1.dump_meta(&store);

        append_file(&path, b" now complete\n");

        // a fresh tailer restored from the checkpoint continues seamlessly
        let mut tailer2 = Tailer::open(
            "test-config",
            &path,
            FileEncoding::Utf8,
            RecordFramer::new(FrameMode::SingleLine, 512 * 1024),
            FileReaderOptions::default(),
        )
        .expect("open");
        let key = tailer2.checkpoint_key();
        let record = store.get(&key).expect("checkpoint present");
        assert!(tailer2.init(Some(&record)).expect("init"));
        assert_eq!(tailer2.cache(), b"second partial");

        let out2 = tailer2.read_once(1024, true).expect("read");
        assert_eq!(out2.records, vec![b"second partial now complete".to_vec()]);
    }

    #[test]
    fn truncated_file_restarts_from_origin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        write_file(&path, b"old content line\n");

        let mut tailer = line_tailer(&path);
        let _ = tailer.read_once(1024, true).expect("read");
        assert_eq!(tailer.offset(), 17);

        // rewrite in place: same inode, different leading bytes
        write_file(&path, b"fresh\n");
        let out = tailer.read_once(1024, true).expect("read after truncate");
        assert!(out.more_data);
        assert_eq!(tailer.offset(), 0);

        let out = tailer.read_once(1024, true).expect("re-read");
        assert_eq!(out.records, vec![b"fresh".to_vec()]);
    }

    #[test]
    fn replaced_file_rotates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        write_file(&path, b"before rotate\n");

        let mut tailer = line_tailer(&path);
        let _ = tailer.read_once(1024, true).expect("read");

        std::fs::remove_file(&path).expect("remove");
        write_file(&path, b"after rotate\n");

        let _ = tailer.read_once(1024, true).expect("read");
        assert_eq!(tailer.state(), TailerState::Rotated);
    }

    #[test]
    fn buffer_full_releases_aligned_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let long = vec![b'x'; 64];
        write_file(&path, &long); // no newline at all

        let mut tailer = line_tailer(&path);
        tailer.set_buffer_size(32);
        let out = tailer.read_once(1024, true).expect("read");
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].len(), 32);
        assert!(out.more_data);
    }

    #[test]
    fn tail_size_bootstrap_skips_backlog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("app.log");
        let mut content = Vec::new();
        for i in 0..400 {
            content.extend_from_slice(format!("backlog line {i}\n").as_bytes());
        }
        write_file(&path, &content);

        let opts = FileReaderOptions {
            tail_size_kb: 1,
            ..FileReaderOptions::default()
        };
        let mut tailer = Tailer::open(
            "test-config",
            &path,
            FileEncoding::Utf8,
            RecordFramer::new(FrameMode::SingleLine, 512 * 1024),
            opts,
        )
        .expect("open");
        tailer.init(None).expect("init");
        assert!(tailer.offset() > 0);
        // offset sits just past a newline
        let out = tailer.read_once(64 * 1024, true).expect("read");
        assert!(out.records.iter().all(|r| r.starts_with(b"backlog line ")));
    }
}
