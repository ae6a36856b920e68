//! Pipeline event model.
//!
//! Every record the agent collects becomes an [`Event`]: a tagged variant
//! over log, metric, span, and raw payloads, with a shared header carrying
//! the timestamp and tag set. Events travel in [`EventGroup`]s, ordered
//! batches that share group-level tags and source metadata, and the group is
//! the unit handed to processors and serializers.
//!
//! Sizes are byte-accounted: [`Event::data_size`] is memoized and reset on
//! mutation so batch accounting stays correct after a value changes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

/// Shared attributes of every event variant: timestamp plus a tag set with
/// unique keys in insertion order.
#[derive(Debug, Default)]
pub struct EventHeader {
    timestamp_secs: i64,
    timestamp_nanos: Option<u32>,
    tags: Vec<(String, String)>,
    // 0 means "not computed"; any payload mutation resets it.
    size_cache: AtomicUsize,
}

impl Clone for EventHeader {
    fn clone(&self) -> Self {
        Self {
            timestamp_secs: self.timestamp_secs,
            timestamp_nanos: self.timestamp_nanos,
            tags: self.tags.clone(),
            size_cache: AtomicUsize::new(self.size_cache.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for EventHeader {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp_secs == other.timestamp_secs
            && self.timestamp_nanos == other.timestamp_nanos
            && self.tags == other.tags
    }
}

impl EventHeader {
    #[must_use]
    pub fn timestamp_secs(&self) -> i64 {
        self.timestamp_secs
    }

    #[must_use]
    pub fn timestamp_nanos(&self) -> Option<u32> {
        self.timestamp_nanos
    }

    pub fn set_timestamp(&mut self, secs: i64) {
        self.timestamp_secs = secs;
        self.mark_dirty();
    }

    pub fn set_timestamp_with_nanos(&mut self, secs: i64, nanos: u32) {
        self.timestamp_secs = secs;
        self.timestamp_nanos = Some(nanos);
        self.mark_dirty();
    }

    /// Sets a tag, replacing any existing value under the same key. Keys are
    /// unique within an event.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.tags.push((key, value));
        }
        self.mark_dirty();
    }

    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn del_tag(&mut self, key: &str) {
        self.tags.retain(|(k, _)| k != key);
        self.mark_dirty();
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn tags_len(&self) -> usize {
        self.tags.len()
    }

    fn mark_dirty(&self) {
        self.size_cache.store(0, Ordering::Relaxed);
    }

    fn base_size(&self) -> usize {
        let tags: usize = self.tags.iter().map(|(k, v)| k.len() + v.len()).sum();
        std::mem::size_of::<i64>() + std::mem::size_of::<Option<u32>>() + tags
    }
}

/// A log record: an ordered list of content key/value pairs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LogEvent {
    pub header: EventHeader,
    contents: Vec<(String, String)>,
}

impl LogEvent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a content field, replacing any existing value under the key.
    pub fn set_content(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.contents.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.contents.push((key, value));
        }
        self.header.mark_dirty();
    }

    #[must_use]
    pub fn content(&self, key: &str) -> Option<&str> {
        self.contents
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contents(&self) -> impl Iterator<Item = (&str, &str)> {
        self.contents.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    fn payload_size(&self) -> usize {
        self.contents.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

/// A metric sample value: either a single scalar or a named map of doubles
/// for multi-valued samples.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    Untyped(f64),
    MultiDouble(BTreeMap<String, f64>),
}

impl MetricValue {
    fn payload_size(&self) -> usize {
        match self {
            MetricValue::Untyped(_) => std::mem::size_of::<f64>(),
            MetricValue::MultiDouble(values) => values
                .iter()
                .map(|(k, _)| k.len() + std::mem::size_of::<f64>())
                .sum(),
        }
    }
}

/// A metric sample. Tags local to the sample live in the header tag set.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    pub header: EventHeader,
    name: String,
    value: MetricValue,
}

impl MetricEvent {
    #[must_use]
    pub fn new(name: impl Into<String>, value: MetricValue) -> Self {
        Self {
            header: EventHeader::default(),
            name: name.into(),
            value,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.header.mark_dirty();
    }

    #[must_use]
    pub fn value(&self) -> &MetricValue {
        &self.value
    }

    /// Replaces the value. Size accounting is reset so the owning batch sees
    /// the new payload size.
    pub fn set_value(&mut self, value: MetricValue) {
        self.value = value;
        self.header.mark_dirty();
    }

    /// Upserts one entry of a multi-valued sample, converting a scalar value
    /// in place if necessary.
    pub fn set_multi_value(&mut self, key: impl Into<String>, value: f64) {
        match &mut self.value {
            MetricValue::MultiDouble(values) => {
                values.insert(key.into(), value);
            }
            MetricValue::Untyped(_) => {
                let mut values = BTreeMap::new();
                values.insert(key.into(), value);
                self.value = MetricValue::MultiDouble(values);
            }
        }
        self.header.mark_dirty();
    }
}

/// Span status as reported by the emitting tracer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

/// A trace span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanEvent {
    pub header: EventHeader,
    pub name: String,
    pub trace_id: String,
    pub span_id: String,
    pub start_time_ns: u64,
    pub end_time_ns: u64,
    pub status: SpanStatus,
    pub attributes: Vec<(String, String)>,
}

impl SpanEvent {
    fn payload_size(&self) -> usize {
        self.name.len()
            + self.trace_id.len()
            + self.span_id.len()
            + 2 * std::mem::size_of::<u64>()
            + self
                .attributes
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

/// An unparsed record: a single content byte-string.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawEvent {
    pub header: EventHeader,
    content: Bytes,
}

impl RawEvent {
    #[must_use]
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            header: EventHeader::default(),
            content: content.into(),
        }
    }

    #[must_use]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        self.content = content.into();
        self.header.mark_dirty();
    }
}

/// A pipeline event: the tagged sum over every payload kind the agent
/// collects.
///
/// Cloning an event produces a fully independent copy that outlives the
/// group it was allocated in; it is the only safe way to move an event
/// across pipeline boundaries.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Log(LogEvent),
    Metric(MetricEvent),
    Span(SpanEvent),
    Raw(RawEvent),
}

impl Event {
    #[must_use]
    pub fn header(&self) -> &EventHeader {
        match self {
            Event::Log(e) => &e.header,
            Event::Metric(e) => &e.header,
            Event::Span(e) => &e.header,
            Event::Raw(e) => &e.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut EventHeader {
        match self {
            Event::Log(e) => &mut e.header,
            Event::Metric(e) => &mut e.header,
            Event::Span(e) => &mut e.header,
            Event::Raw(e) => &mut e.header,
        }
    }

    #[must_use]
    pub fn timestamp_secs(&self) -> i64 {
        self.header().timestamp_secs
    }

    #[must_use]
    pub fn is_metric(&self) -> bool {
        matches!(self, Event::Metric(_))
    }

    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Event::Log(_) => "log",
            Event::Metric(_) => "metric",
            Event::Span(_) => "span",
            Event::Raw(_) => "raw",
        }
    }

    /// Byte size of the event payload, memoized until the next mutation.
    #[must_use]
    pub fn data_size(&self) -> usize {
        let header = self.header();
        let cached = header.size_cache.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let payload = match self {
            Event::Log(e) => e.payload_size(),
            Event::Metric(e) => e.name.len() + e.value.payload_size(),
            Event::Span(e) => e.payload_size(),
            Event::Raw(e) => e.content.len(),
        };
        let size = header.base_size() + payload;
        header.size_cache.store(size, Ordering::Relaxed);
        size
    }
}

/// Source metadata attached to an event group: where the events came from and
/// which byte range of the source they cover.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GroupMetadata {
    pub source_path: Option<String>,
    pub topic: Option<String>,
    pub host: Option<String>,
    /// Byte range `[start, end)` of the source file covered by this group.
    pub offset_range: Option<(u64, u64)>,
}

/// An ordered sequence of events sharing group-level tags and metadata.
///
/// The group owns its events; [`EventGroup::push`] returns the index of the
/// inserted event within the group. Insertion order is preserved end to end.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventGroup {
    events: Vec<Event>,
    tags: Vec<(String, String)>,
    metadata: GroupMetadata,
}

impl EventGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event and returns its index within the group.
    pub fn push(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len() - 1
    }

    #[must_use]
    pub fn event(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn event_mut(&mut self, index: usize) -> Option<&mut Event> {
        self.events.get_mut(index)
    }

    #[must_use]
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Sets a group tag, replacing any existing value under the same key.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.tags.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.tags.push((key, value));
        }
    }

    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn metadata(&self) -> &GroupMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut GroupMetadata {
        &mut self.metadata
    }

    /// Total byte size of the group: event payloads plus group tags.
    #[must_use]
    pub fn data_size(&self) -> usize {
        let tags: usize = self.tags.iter().map(|(k, v)| k.len() + v.len()).sum();
        tags + self.events.iter().map(Event::data_size).sum::<usize>()
    }
}
