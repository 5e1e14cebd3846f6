//! In-pipeline span processors, applied in order before export.

use crate::span::{AttributeValue, SpanBatch};
use pipeline_config::Value;
use thiserror::Error;

/// Invalid processor configuration found while building a pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid `{field}` in processor {processor}: {reason}")]
pub struct ProcessorConfigError {
    pub processor: String,
    pub field: &'static str,
    pub reason: String,
}

/// Transforms a batch on its way to the exporters.
///
/// A processor may split a batch; the chain exports each output batch.
pub trait SpanProcessor: Send + Sync {
    fn process(&self, batch: SpanBatch) -> Vec<SpanBatch>;

    fn name(&self) -> &str;
}

/// Stamps configured labels onto every span as string attributes.
///
/// Existing attributes with the same key are left alone.
pub struct ResourceProcessor {
    name: String,
    labels: Vec<(String, String)>,
}

impl ResourceProcessor {
    pub fn new(name: impl Into<String>, labels: Vec<(String, String)>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    /// Reads `labels: {key: value, ...}`.
    pub fn from_config(name: &str, config: &Value) -> Result<Self, ProcessorConfigError> {
        let invalid = |reason: String| ProcessorConfigError {
            processor: name.to_owned(),
            field: "labels",
            reason,
        };
        let mut labels = Vec::new();
        match config.get("labels") {
            None => {}
            Some(v) if v.is_null() => {}
            Some(Value::Mapping(mapping)) => {
                for (key, value) in mapping {
                    let value = value
                        .as_str()
                        .ok_or_else(|| invalid(format!("label {key} is not a string")))?;
                    labels.push((key.clone(), value.to_owned()));
                }
            }
            Some(_) => return Err(invalid("expected a mapping".to_owned())),
        }
        Ok(Self::new(name, labels))
    }
}

impl SpanProcessor for ResourceProcessor {
    fn process(&self, mut batch: SpanBatch) -> Vec<SpanBatch> {
        if !self.labels.is_empty() {
            for span in &mut batch.spans {
                for (key, value) in &self.labels {
                    span.attributes
                        .entry(key.clone())
                        .or_insert_with(|| AttributeValue::String(value.clone()));
                }
            }
        }
        vec![batch]
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Caps the number of spans handed to an exporter in one call.
pub struct BatchProcessor {
    name: String,
    send_batch_size: usize,
}

impl BatchProcessor {
    pub fn new(name: impl Into<String>, send_batch_size: usize) -> Self {
        Self {
            name: name.into(),
            send_batch_size: send_batch_size.max(1),
        }
    }

    /// Reads `send_batch_size`, which must be a positive integer.
    pub fn from_config(name: &str, config: &Value) -> Result<Self, ProcessorConfigError> {
        let size = match config.get("send_batch_size") {
            None => usize::MAX,
            Some(v) => v
                .as_i64()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| ProcessorConfigError {
                    processor: name.to_owned(),
                    field: "send_batch_size",
                    reason: "expected a positive integer".to_owned(),
                })?,
        };
        Ok(Self::new(name, size))
    }

    pub fn send_batch_size(&self) -> usize {
        self.send_batch_size
    }
}

impl SpanProcessor for BatchProcessor {
    fn process(&self, batch: SpanBatch) -> Vec<SpanBatch> {
        if batch.len() <= self.send_batch_size {
            return vec![batch];
        }
        let timestamp = batch.timestamp;
        let mut spans = batch.spans;
        let mut out = Vec::with_capacity(spans.len().div_ceil(self.send_batch_size));
        while !spans.is_empty() {
            let rest = spans.split_off(self.send_batch_size.min(spans.len()));
            out.push(SpanBatch { spans, timestamp });
            spans = rest;
        }
        out
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Runs `batch` through `processors` in order.
pub fn apply_processors(processors: &[Box<dyn SpanProcessor>], batch: SpanBatch) -> Vec<SpanBatch> {
    processors.iter().fold(vec![batch], |batches, processor| {
        batches
            .into_iter()
            .flat_map(|b| processor.process(b))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Span, SpanKind};

    fn batch(n: u64) -> SpanBatch {
        SpanBatch::with_spans(
            (0..n)
                .map(|i| Span::new(1, i, 0, "op", SpanKind::Server))
                .collect(),
        )
    }

    fn yaml(s: &str) -> Value {
        pipeline_config::parse_override(s).unwrap()
    }

    #[test]
    fn test_resource_labels_added_without_clobbering() {
        let processor =
            ResourceProcessor::from_config("resource", &yaml("labels: {env: prod, zone: a}"))
                .unwrap();
        let mut input = batch(2);
        input.spans[0].set_attribute("env", AttributeValue::String("dev".to_owned()));

        let out = processor.process(input);
        assert_eq!(out.len(), 1);
        assert_eq!(
            out[0].spans[0].attributes.get("env"),
            Some(&AttributeValue::String("dev".to_owned()))
        );
        assert_eq!(
            out[0].spans[1].attributes.get("env"),
            Some(&AttributeValue::String("prod".to_owned()))
        );
        assert!(out[0].spans.iter().all(|s| s.attributes.contains_key("zone")));
    }

    #[test]
    fn test_resource_rejects_non_string_label() {
        let err = ResourceProcessor::from_config("resource", &yaml("labels: {port: 80}"))
            .err()
            .unwrap();
        assert_eq!(err.field, "labels");
    }

    #[test]
    fn test_batch_splits_oversized_batches() {
        let processor = BatchProcessor::from_config("batch", &yaml("send_batch_size: 4")).unwrap();
        let sizes: Vec<_> = processor.process(batch(10)).iter().map(SpanBatch::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(processor.process(batch(3)).len(), 1);
    }

    #[test]
    fn test_batch_rejects_zero_size() {
        assert!(BatchProcessor::from_config("batch", &yaml("send_batch_size: 0")).is_err());
    }

    #[test]
    fn test_chain_applies_in_order() {
        let processors: Vec<Box<dyn SpanProcessor>> = vec![
            Box::new(ResourceProcessor::new("resource", vec![("k".into(), "v".into())])),
            Box::new(BatchProcessor::new("batch", 2)),
        ];
        let out = apply_processors(&processors, batch(5));
        assert_eq!(out.len(), 3);
        assert!(out
            .iter()
            .flat_map(|b| &b.spans)
            .all(|s| s.attributes.contains_key("k")));
    }
}
