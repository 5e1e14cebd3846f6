use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Byte-size estimate used by memory-budgeted queues.
///
/// Estimates only need to be stable and roughly proportional to heap usage;
/// they are never used for allocation.
pub trait EstimateSize {
    fn estimated_size(&self) -> usize;
}

/// A single distributed tracing span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    /// Trace identifier (128-bit)
    pub trace_id: u128,
    /// Span identifier (64-bit)
    pub span_id: u64,
    /// Parent span identifier (0 for a root span)
    pub parent_span_id: u64,
    /// Start time (Unix nanoseconds)
    pub start_time: u64,
    /// End time (Unix nanoseconds)
    pub end_time: u64,
    /// Operation name
    pub name: String,
    /// Emitting service
    pub service_name: String,
    pub attributes: Box<HashMap<String, AttributeValue>>,
    pub status: SpanStatus,
    pub kind: SpanKind,
}

/// Attribute value types for span metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    Ok,
    Error,
    Unset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// Spans received in one request, forwarded as a unit.
#[derive(Debug, Clone)]
pub struct SpanBatch {
    pub spans: Vec<Span>,
    /// When the batch was received
    pub timestamp: SystemTime,
}

fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl Span {
    pub fn new(
        trace_id: u128,
        span_id: u64,
        parent_span_id: u64,
        name: impl Into<String>,
        kind: SpanKind,
    ) -> Self {
        let now = unix_nanos();
        Self {
            trace_id,
            span_id,
            parent_span_id,
            start_time: now,
            end_time: now,
            name: name.into(),
            service_name: String::new(),
            attributes: Box::default(),
            status: SpanStatus::Unset,
            kind,
        }
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Marks the span as completed with the given status
    pub fn finish(&mut self, status: SpanStatus) {
        self.end_time = unix_nanos();
        self.status = status;
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.attributes.insert(key.into(), value);
    }

    pub fn duration_nanos(&self) -> u64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

impl EstimateSize for AttributeValue {
    fn estimated_size(&self) -> usize {
        match self {
            AttributeValue::String(s) => s.len(),
            AttributeValue::Int(_) | AttributeValue::Float(_) => 8,
            AttributeValue::Bool(_) => 1,
            AttributeValue::Array(items) => items.iter().map(String::len).sum(),
        }
    }
}

impl EstimateSize for Span {
    fn estimated_size(&self) -> usize {
        let attributes: usize = self
            .attributes
            .iter()
            .map(|(k, v)| k.len() + v.estimated_size())
            .sum();
        std::mem::size_of::<Span>() + self.name.len() + self.service_name.len() + attributes
    }
}

impl SpanBatch {
    pub fn new() -> Self {
        Self::with_spans(Vec::new())
    }

    pub fn with_spans(spans: Vec<Span>) -> Self {
        Self {
            spans,
            timestamp: SystemTime::now(),
        }
    }

    pub fn add(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

impl Default for SpanBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl EstimateSize for SpanBatch {
    fn estimated_size(&self) -> usize {
        std::mem::size_of::<SpanBatch>() + self.spans.iter().map(Span::estimated_size).sum::<usize>()
    }
}
