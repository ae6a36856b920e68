//! File reader options.
//!
//! Parsed from the `detail` object of a file input plugin. Parsing is
//! deliberately lenient in the same places the rest of the configuration
//! layer is: a wrong type on a numeric option falls back to its default with
//! a warning, while an unknown encoding or a non-boolean where a boolean is
//! expected rejects the pipeline at init.

use serde_json::Value;
use tracing::warn;

use crate::config::ConfigError;
use crate::tail::encoding::FileEncoding;

const DEFAULT_TAIL_SIZE_KB: u32 = 1024;
const DEFAULT_FLUSH_TIMEOUT_SECS: u32 = 5;
const DEFAULT_DELAY_ALERT_BYTES: u64 = 200 * 1024 * 1024;
const DEFAULT_CLOSE_UNUSED_SECS: u32 = 900;
const DEFAULT_ROTATOR_QUEUE_SIZE: u32 = 20;
const MAX_TAIL_SIZE_KB: u32 = 100 * 1024 * 1024;

/// Options governing how a single file is tailed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReaderOptions {
    pub file_encoding: FileEncoding,
    pub tailing_all_matched_files: bool,
    /// Backlog cap for first-seen files: start at `size - TailSizeKB` KiB.
    pub tail_size_kb: u32,
    /// Seconds to wait for a record terminator before force-flushing the
    /// carry-cache as one synthetic record.
    pub flush_timeout_secs: u32,
    pub read_delay_skip_threshold_bytes: u64,
    pub read_delay_alert_threshold_bytes: u64,
    pub close_unused_reader_interval_secs: u32,
    pub rotator_queue_size: u32,
}

impl Default for FileReaderOptions {
    fn default() -> Self {
        FileReaderOptions {
            file_encoding: FileEncoding::Utf8,
            tailing_all_matched_files: false,
            tail_size_kb: DEFAULT_TAIL_SIZE_KB,
            flush_timeout_secs: DEFAULT_FLUSH_TIMEOUT_SECS,
            read_delay_skip_threshold_bytes: 0,
            read_delay_alert_threshold_bytes: DEFAULT_DELAY_ALERT_BYTES,
            close_unused_reader_interval_secs: DEFAULT_CLOSE_UNUSED_SECS,
            rotator_queue_size: DEFAULT_ROTATOR_QUEUE_SIZE,
        }
    }
}

impl FileReaderOptions {
    /// Parses options from a plugin `detail` object.
    pub fn from_json(detail: &Value, plugin: &str) -> Result<Self, ConfigError> {
        let mut opts = FileReaderOptions::default();

        match detail.get("FileEncoding") {
            None => {}
            Some(Value::String(s)) => match FileEncoding::parse(s) {
                Some(encoding) => opts.file_encoding = encoding,
                None => {
                    return Err(ConfigError::InvalidParam {
                        plugin: plugin.to_string(),
                        param: "FileEncoding",
                        reason: format!("unknown encoding {s:?}"),
                    });
                }
            },
            Some(other) => {
                return Err(ConfigError::InvalidParam {
                    plugin: plugin.to_string(),
                    param: "FileEncoding",
                    reason: format!("expected string, got {other}"),
                });
            }
        }

        opts.tailing_all_matched_files = required_bool(
            detail,
            "TailingAllMatchedFiles",
            opts.tailing_all_matched_files,
            plugin,
        )?;

        opts.tail_size_kb = lenient_u32(detail, "TailSizeKB", opts.tail_size_kb, plugin);
        if opts.tail_size_kb > MAX_TAIL_SIZE_KB {
            warn!(
                "{}: TailSizeKB {} exceeds the supported maximum, using default {}",
                plugin, opts.tail_size_kb, DEFAULT_TAIL_SIZE_KB
            );
            opts.tail_size_kb = DEFAULT_TAIL_SIZE_KB;
        }
        opts.flush_timeout_secs =
            lenient_u32(detail, "FlushTimeoutSecs", opts.flush_timeout_secs, plugin);
        opts.read_delay_skip_threshold_bytes = lenient_u64(
            detail,
            "ReadDelaySkipThresholdBytes",
            opts.read_delay_skip_threshold_bytes,
            plugin,
        );
        opts.read_delay_alert_threshold_bytes = lenient_u64(
            detail,
            "ReadDelayAlertThresholdBytes",
            opts.read_delay_alert_threshold_bytes,
            plugin,
        );
        opts.close_unused_reader_interval_secs = lenient_u32(
            detail,
            "CloseUnusedReaderIntervalSec",
            opts.close_unused_reader_interval_secs,
            plugin,
        );
        opts.rotator_queue_size =
            lenient_u32(detail, "RotatorQueueSize", opts.rotator_queue_size, plugin);

        Ok(opts)
    }
}

fn required_bool(
    detail: &Value,
    key: &'static str,
    default: bool,
    plugin: &str,
) -> Result<bool, ConfigError> {
    match detail.get(key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ConfigError::InvalidParam {
            plugin: plugin.to_string(),
            param: key,
            reason: format!("expected boolean, got {other}"),
        }),
    }
}

fn lenient_u64(detail: &Value, key: &str, default: u64, plugin: &str) -> u64 {
    match detail.get(key) {
        None => default,
        Some(value) => match value.as_u64() {
            Some(n) => n,
            None => {
                warn!(
                    "{}: param {} has unexpected value {}, using default {}",
                    plugin, key, value, default
                );
                default
            }
        },
    }
}

fn lenient_u32(detail: &Value, key: &str, default: u32, plugin: &str) -> u32 {
    match detail.get(key) {
        None => default,
        Some(value) => match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
            Some(n) => n,
            None => {
                warn!(
                    "{}: param {} has unexpected value {}, using default {}",
                    plugin, key, value, default
                );
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_without_params() {
        let opts = FileReaderOptions::from_json(&json!({}), "input_file").expect("init");
        assert_eq!(opts, FileReaderOptions::default());
    }

    #[test]
    fn valid_optional_params() {
        let detail = json!({
            "FileEncoding": "utf8",
            "TailingAllMatchedFiles": true,
            "TailSizeKB": 2048,
            "FlushTimeoutSecs": 2,
            "ReadDelaySkipThresholdBytes": 1000,
            "ReadDelayAlertThresholdBytes": 100,
            "CloseUnusedReaderIntervalSec": 10,
            "RotatorQueueSize": 15
        });
        let opts = FileReaderOptions::from_json(&detail, "input_file").expect("init");
        assert_eq!(opts.file_encoding, FileEncoding::Utf8);
        assert!(opts.tailing_all_matched_files);
        assert_eq!(opts.tail_size_kb, 2048);
        assert_eq!(opts.flush_timeout_secs, 2);
        assert_eq!(opts.read_delay_skip_threshold_bytes, 1000);
        assert_eq!(opts.read_delay_alert_threshold_bytes, 100);
        assert_eq!(opts.close_unused_reader_interval_secs, 10);
        assert_eq!(opts.rotator_queue_size, 15);
    }

    #[test]
    fn numeric_type_mismatch_falls_back_to_default() {
        let detail = json!({
            "FileEncoding": "gbk",
            "TailSizeKB": "2048",
            "FlushTimeoutSecs": "2",
            "ReadDelaySkipThresholdBytes": "1000",
            "ReadDelayAlertThresholdBytes": "100",
            "CloseUnusedReaderIntervalSec": "10",
            "RotatorQueueSize": "15"
        });
        let opts = FileReaderOptions::from_json(&detail, "input_file").expect("init");
        assert_eq!(opts.file_encoding, FileEncoding::Gbk);
        let defaults = FileReaderOptions::default();
        assert_eq!(opts.tail_size_kb, defaults.tail_size_kb);
        assert_eq!(opts.flush_timeout_secs, defaults.flush_timeout_secs);
        assert_eq!(
            opts.read_delay_alert_threshold_bytes,
            defaults.read_delay_alert_threshold_bytes
        );
        assert_eq!(opts.rotator_queue_size, defaults.rotator_queue_size);
    }

    #[test]
    fn utf16_spelling_maps_to_little_endian() {
        let opts = FileReaderOptions::from_json(&json!({"FileEncoding": "utf16"}), "input_file")
            .expect("init");
        assert_eq!(opts.file_encoding, FileEncoding::Utf16Le);
    }

    #[test]
    fn oversized_tail_limit_resets_to_default() {
        let detail = json!({"TailSizeKB": 200_000_000u64});
        let opts = FileReaderOptions::from_json(&detail, "input_file").expect("init");
        assert_eq!(opts.tail_size_kb, FileReaderOptions::default().tail_size_kb);
    }

    #[test]
    fn unknown_encoding_fails_init() {
        let result = FileReaderOptions::from_json(&json!({"FileEncoding": "unknown"}), "input_file");
        assert!(result.is_err());
    }

    #[test]
    fn non_string_encoding_fails_init() {
        let result = FileReaderOptions::from_json(&json!({"FileEncoding": true}), "input_file");
        assert!(result.is_err());
    }

    #[test]
    fn non_boolean_where_boolean_expected_fails_init() {
        let result = FileReaderOptions::from_json(
            &json!({"TailingAllMatchedFiles": "true"}),
            "input_file",
        );
        assert!(result.is_err());
    }
}
