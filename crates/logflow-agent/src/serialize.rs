//! Event-group serialization.
//!
//! The JSON serializer is the reference sink format: one JSON object per
//! event per line (NDJSON). Group tags are merged into every object along
//! with `__time__`; metric events carry their local tags under
//! `__labels__`, the metric name under `__name__`, and the sample under
//! `__value__` (a scalar or a nested object for multi-valued samples).
//!
//! The serializer is stateless and safe to share across threads.

use serde_json::{json, Map, Value};

use crate::events::{Event, EventGroup, MetricValue};

const KEY_TIME: &str = "__time__";
const KEY_LABELS: &str = "__labels__";
const KEY_NAME: &str = "__name__";
const KEY_VALUE: &str = "__value__";
const KEY_CONTENT: &str = "content";

/// Serialization failures. Both reject the whole group.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SerializeError {
    #[error("empty event group")]
    InvalidEventGroup,
    #[error("unsupported event variant: {0}")]
    UnsupportedVariant(&'static str),
}

/// Serializes event groups to newline-delimited JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonEventGroupSerializer;

impl JsonEventGroupSerializer {
    #[must_use]
    pub fn new() -> Self {
        JsonEventGroupSerializer
    }

    pub fn serialize(&self, group: &EventGroup) -> Result<Vec<u8>, SerializeError> {
        if group.is_empty() {
            return Err(SerializeError::InvalidEventGroup);
        }

        let group_tags: Map<String, Value> = group
            .tags()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();

        let mut out = Vec::new();
        for event in group.events() {
            let mut object = group_tags.clone();
            object.insert(KEY_TIME.to_string(), json!(event.timestamp_secs()));
            match event {
                Event::Log(log) => {
                    for (k, v) in log.contents() {
                        object.insert(k.to_string(), Value::String(v.to_string()));
                    }
                }
                Event::Metric(metric) => {
                    let labels: Map<String, Value> = metric
                        .header
                        .tags()
                        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                        .collect();
                    object.insert(KEY_LABELS.to_string(), Value::Object(labels));
                    object.insert(KEY_NAME.to_string(), json!(metric.name()));
                    let value = match metric.value() {
                        MetricValue::Untyped(v) => json!(v),
                        MetricValue::MultiDouble(values) => {
                            Value::Object(values.iter().map(|(k, v)| (k.clone(), json!(v))).collect())
                        }
                    };
                    object.insert(KEY_VALUE.to_string(), value);
                }
                Event::Raw(raw) => {
                    object.insert(
                        KEY_CONTENT.to_string(),
                        Value::String(String::from_utf8_lossy(raw.content()).into_owned()),
                    );
                }
                Event::Span(_) => {
                    return Err(SerializeError::UnsupportedVariant("span"));
                }
            }
            // serde_json cannot fail on string/number maps
            let line = serde_json::to_vec(&Value::Object(object)).unwrap_or_default();
            out.extend_from_slice(&line);
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogEvent, MetricEvent, RawEvent, SpanEvent};
    use std::collections::BTreeMap;

    fn parse_lines(bytes: &[u8]) -> Vec<Value> {
        String::from_utf8(bytes.to_vec())
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid json line"))
            .collect()
    }

    #[test]
    fn log_events_merge_group_tags_and_contents() {
        let mut group = EventGroup::new();
        group.set_tag("host", "web-1");
        let mut log = LogEvent::new();
        log.header.set_timestamp(1_700_000_000);
        log.set_content("content", "hello");
        log.set_content("level", "info");
        group.push(Event::Log(log));

        let out = JsonEventGroupSerializer::new().serialize(&group).expect("serialize");
        let lines = parse_lines(&out);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["host"], "web-1");
        assert_eq!(lines[0]["__time__"], 1_700_000_000i64);
        assert_eq!(lines[0]["content"], "hello");
        assert_eq!(lines[0]["level"], "info");
    }

    #[test]
    fn one_line_per_event() {
        let mut group = EventGroup::new();
        for i in 0..3 {
            let mut log = LogEvent::new();
            log.set_content("content", format!("line {i}"));
            group.push(Event::Log(log));
        }
        let out = JsonEventGroupSerializer::new().serialize(&group).expect("serialize");
        assert_eq!(parse_lines(&out).len(), 3);
    }

    #[test]
    fn scalar_metric_layout() {
        let mut group = EventGroup::new();
        let mut metric = MetricEvent::new("cpu_usage", MetricValue::Untyped(0.75));
        metric.header.set_timestamp(1_700_000_000);
        metric.header.set_tag("core", "0");
        group.push(Event::Metric(metric));

        let out = JsonEventGroupSerializer::new().serialize(&group).expect("serialize");
        let lines = parse_lines(&out);
        assert_eq!(lines[0]["__name__"], "cpu_usage");
        assert_eq!(lines[0]["__value__"], 0.75);
        assert_eq!(lines[0]["__labels__"]["core"], "0");
    }

    #[test]
    fn multi_value_metric_layout() {
        let mut values = BTreeMap::new();
        values.insert("p50".to_string(), 0.5);
        values.insert("p99".to_string(), 2.0);
        let mut group = EventGroup::new();
        group.push(Event::Metric(MetricEvent::new(
            "latency",
            MetricValue::MultiDouble(values),
        )));

        let out = JsonEventGroupSerializer::new().serialize(&group).expect("serialize");
        let lines = parse_lines(&out);
        assert_eq!(lines[0]["__value__"]["p50"], 0.5);
        assert_eq!(lines[0]["__value__"]["p99"], 2.0);
    }

    #[test]
    fn raw_event_content() {
        let mut group = EventGroup::new();
        group.push(Event::Raw(RawEvent::new(&b"unparsed bytes"[..])));
        let out = JsonEventGroupSerializer::new().serialize(&group).expect("serialize");
        let lines = parse_lines(&out);
        assert_eq!(lines[0]["content"], "unparsed bytes");
    }

    #[test]
    fn empty_group_is_rejected() {
        let result = JsonEventGroupSerializer::new().serialize(&EventGroup::new());
        assert_eq!(result, Err(SerializeError::InvalidEventGroup));
    }

    #[test]
    fn span_variant_is_unsupported() {
        let mut group = EventGroup::new();
        group.push(Event::Span(SpanEvent::default()));
        let result = JsonEventGroupSerializer::new().serialize(&group);
        assert_eq!(result, Err(SerializeError::UnsupportedVariant("span")));
    }
}
