//! Record framing.
//!
//! The framer turns a decoded UTF-8 buffer into complete records under one
//! of three modes:
//!
//! - **SingleLine**: records end at `\n`.
//! - **Multiline**: a record opens when the start pattern matches a line and
//!   closes at the end pattern, at the next start match, or when a
//!   configured continuation pattern stops matching.
//! - **Json**: records are brace-balanced JSON objects; brace counting
//!   respects string literals and backslash escapes.
//!
//! Framing is a pure function of the input buffer: bytes that do not yet
//! form a complete record are reported as carry for the caller to keep and
//! re-feed, which is what makes checkpoint restore reproduce identical
//! records. When `allow_rollback` is false (a forced flush), the carry is
//! emitted as a single synthetic record instead.
//!
//! Runs of NUL bytes are holes left by sparse writes: leading holes are
//! discarded, holes inside a terminated record are preserved verbatim.

use regex::Regex;

/// Patterns driving multiline mode. `start` is mandatory; `continuation` and
/// `end` refine where a record closes.
#[derive(Clone, Debug)]
pub struct MultilinePatterns {
    pub start: Regex,
    pub continuation: Option<Regex>,
    pub end: Option<Regex>,
}

/// Framing mode for one tailed file.
#[derive(Clone, Debug, Default)]
pub enum FrameMode {
    #[default]
    SingleLine,
    Multiline(MultilinePatterns),
    Json,
}

impl FrameMode {
    #[must_use]
    pub fn kind(&self) -> FrameModeKind {
        match self {
            FrameMode::SingleLine => FrameModeKind::SingleLine,
            FrameMode::Multiline(_) => FrameModeKind::Multiline,
            FrameMode::Json => FrameModeKind::Json,
        }
    }
}

/// Persistable name of a frame mode, stored in checkpoints so a restored
/// tailer can verify it frames the cache the same way it was written.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FrameModeKind {
    #[default]
    SingleLine,
    Multiline,
    Json,
}

/// Output of one framing pass.
#[derive(Debug, Default)]
pub struct FrameResult {
    /// Complete records, in input order, without their terminators.
    pub records: Vec<Vec<u8>>,
    /// Number of trailing input bytes to keep as carry.
    pub carry: usize,
    /// The carry was flushed as a synthetic record (forced flush).
    pub forced: bool,
    /// A JSON record exceeded `max_record_bytes` without closing and was
    /// emitted unparsed.
    pub overflowed: bool,
}

/// Extracts complete records from decoded buffers under a fixed mode.
#[derive(Clone, Debug)]
pub struct RecordFramer {
    mode: FrameMode,
    max_record_bytes: usize,
}

impl RecordFramer {
    #[must_use]
    pub fn new(mode: FrameMode, max_record_bytes: usize) -> Self {
        RecordFramer {
            mode,
            max_record_bytes,
        }
    }

    #[must_use]
    pub fn mode(&self) -> &FrameMode {
        &self.mode
    }

    /// Extracts complete records from `buf`.
    ///
    /// With `allow_rollback` the remainder stays in carry; without it the
    /// remainder is emitted as one synthetic record and the carry cleared.
    #[must_use]
    pub fn extract(&self, buf: &[u8], allow_rollback: bool) -> FrameResult {
        let mut result = match &self.mode {
            FrameMode::SingleLine => self.extract_single_line(buf),
            FrameMode::Multiline(patterns) => self.extract_multiline(buf, patterns),
            FrameMode::Json => self.extract_json(buf),
        };
        if !allow_rollback && result.carry > 0 {
            let tail = &buf[buf.len() - result.carry..];
            if let Some(record) = trim_hole(tail) {
                result.records.push(record);
            }
            result.carry = 0;
            result.forced = true;
        }
        result
    }

    fn extract_single_line(&self, buf: &[u8]) -> FrameResult {
        let mut result = FrameResult::default();
        let mut pos = 0;
        while let Some(nl) = find_byte(&buf[pos..], b'\n') {
            push_record(&mut result.records, &buf[pos..pos + nl]);
            pos += nl + 1;
        }
        result.carry = buf.len() - pos;
        result
    }

    fn extract_multiline(&self, buf: &[u8], patterns: &MultilinePatterns) -> FrameResult {
        let mut result = FrameResult::default();
        // Open record start, as a byte offset into buf.
        let mut open: Option<usize> = None;
        // End (exclusive, newline excluded) of the last line absorbed into
        // the open record.
        let mut open_end = 0;
        let mut pos = 0;

        while let Some(nl) = find_byte(&buf[pos..], b'\n') {
            let line_start = pos;
            let line_end = pos + nl;
            let line = line_text(&buf[line_start..line_end]);

            if let Some(start) = open {
                if patterns.start.is_match(line) {
                    // A new start closes the previous record.
                    push_record(&mut result.records, &buf[start..open_end]);
                    open = Some(line_start);
                    open_end = line_end;
                } else if let Some(end) = &patterns.end {
                    // With an end pattern, middle lines are absorbed
                    // unconditionally until it matches.
                    open_end = line_end;
                    if end.is_match(line) {
                        push_record(&mut result.records, &buf[start..open_end]);
                        open = None;
                    }
                } else if let Some(cont) = &patterns.continuation {
                    if cont.is_match(line) {
                        open_end = line_end;
                    } else {
                        // Continuation broke: close before this line, then
                        // treat the line as unmatched.
                        push_record(&mut result.records, &buf[start..open_end]);
                        open = None;
                        push_record(&mut result.records, &buf[line_start..line_end]);
                    }
                } else {
                    // Start-only config: the record runs to the next start.
                    open_end = line_end;
                }
            } else if patterns.start.is_match(line) {
                open = Some(line_start);
                open_end = line_end;
            } else {
                // Lines before any start match pass through one by one.
                push_record(&mut result.records, &buf[line_start..line_end]);
            }
            pos = line_end + 1;
        }

        result.carry = match open {
            Some(start) => buf.len() - start,
            None => buf.len() - pos,
        };
        result
    }

    fn extract_json(&self, buf: &[u8]) -> FrameResult {
        let mut result = FrameResult::default();
        let mut pos = 0;
        loop {
            // Skip inter-record whitespace and holes.
            while pos < buf.len() && matches!(buf[pos], b' ' | b'\t' | b'\r' | b'\n' | 0) {
                pos += 1;
            }
            if pos >= buf.len() {
                result.carry = 0;
                return result;
            }
            if buf[pos] == b'{' {
                match scan_balanced_object(&buf[pos..]) {
                    Some(len) => {
                        push_record(&mut result.records, &buf[pos..pos + len]);
                        pos += len;
                    }
                    None => {
                        // Open object: keep it in carry unless it has grown
                        // past the record cap, then give up on balance.
                        if buf.len() - pos > self.max_record_bytes {
                            push_record(&mut result.records, &buf[pos..]);
                            result.overflowed = true;
                            result.carry = 0;
                        } else {
                            result.carry = buf.len() - pos;
                        }
                        return result;
                    }
                }
            } else {
                // Not an object: pass the line through as-is.
                match find_byte(&buf[pos..], b'\n') {
                    Some(nl) => {
                        push_record(&mut result.records, &buf[pos..pos + nl]);
                        pos += nl + 1;
                    }
                    None => {
                        result.carry = buf.len() - pos;
                        return result;
                    }
                }
            }
        }
    }
}

/// Length of the brace-balanced object starting at `buf[0]`, or `None` if
/// the closing brace has not arrived.
fn scan_balanced_object(buf: &[u8]) -> Option<usize> {
    let mut depth = 0u32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
    }
    None
}

fn find_byte(buf: &[u8], needle: u8) -> Option<usize> {
    buf.iter().position(|&b| b == needle)
}

/// A record payload with its leading hole removed. Fully-hole slices yield
/// nothing.
fn push_record(records: &mut Vec<Vec<u8>>, slice: &[u8]) {
    let start = slice.iter().position(|&b| b != 0).unwrap_or(slice.len());
    if start < slice.len() {
        records.push(slice[start..].to_vec());
    }
}

/// Synthetic record for a forced flush: the trailing line terminator and
/// leading/trailing holes are trimmed.
pub(crate) fn trim_hole(slice: &[u8]) -> Option<Vec<u8>> {
    let slice = match slice.last() {
        Some(b'\n') => &slice[..slice.len() - 1],
        _ => slice,
    };
    let slice = match slice.last() {
        Some(b'\r') => &slice[..slice.len() - 1],
        _ => slice,
    };
    let start = slice.iter().position(|&b| b != 0)?;
    let end = slice.iter().rposition(|&b| b != 0)? + 1;
    Some(slice[start..end].to_vec())
}

/// Pattern matching operates on the line text without its trailing `\r`.
fn line_text(line: &[u8]) -> &str {
    let line = match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    };
    std::str::from_utf8(line).unwrap_or("")
}
