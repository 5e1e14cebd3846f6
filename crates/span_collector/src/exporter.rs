use crate::span::{Span, SpanBatch};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors an exporter reports for one batch.
///
/// The worker pool never inspects these beyond logging and counting; retry
/// policy belongs to the exporter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// Transport-layer error (network, gRPC, HTTP)
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("export operation timed out")]
    Timeout,
    /// The backend refused the batch
    #[error("rejected by backend: {0}")]
    Rejected(String),
}

/// Trait for exporting span batches to a storage backend.
///
/// Uses native async fn in traits. For dynamic dispatch use
/// `dyn SpanExporterBoxed`, which every `SpanExporter` implements.
pub trait SpanExporter: Send + Sync {
    fn export(&self, batch: SpanBatch) -> impl Future<Output = Result<(), ExportError>> + Send;

    /// Component name as it appears in the pipeline (e.g. `cassandra/archive`).
    fn name(&self) -> &str;
}

/// Object-safe version of [`SpanExporter`].
pub trait SpanExporterBoxed: Send + Sync {
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>>;

    fn name(&self) -> &str;
}

impl<T: SpanExporter> SpanExporterBoxed for T {
    fn export_boxed(
        &self,
        batch: SpanBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + '_>> {
        Box::pin(self.export(batch))
    }

    fn name(&self) -> &str {
        SpanExporter::name(self)
    }
}

/// Logs every batch it receives and drops it.
///
/// Batch sizes go out at `debug`; the serialized spans at `trace`.
pub struct LoggingExporter {
    name: String,
}

impl LoggingExporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl SpanExporter for LoggingExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        debug!(exporter = %self.name, spans = batch.len(), "exporting batch");
        if tracing::enabled!(tracing::Level::TRACE) {
            let json = serde_json::to_string(&batch.spans)
                .map_err(|e| ExportError::Serialization(e.to_string()))?;
            trace!(exporter = %self.name, %json, "batch contents");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct TraceStore {
    order: VecDeque<u128>,
    traces: HashMap<u128, Vec<Span>>,
}

/// Keeps the most recent traces in memory, evicting the oldest past `max_traces`.
pub struct MemoryExporter {
    name: String,
    max_traces: usize,
    store: Mutex<TraceStore>,
}

impl MemoryExporter {
    pub fn new(name: impl Into<String>, max_traces: usize) -> Self {
        Self {
            name: name.into(),
            max_traces,
            store: Mutex::new(TraceStore::default()),
        }
    }

    /// Number of traces held.
    pub fn trace_count(&self) -> usize {
        self.store.lock().map(|s| s.order.len()).unwrap_or_default()
    }

    /// Stored spans of `trace_id` in arrival order.
    pub fn trace(&self, trace_id: u128) -> Vec<Span> {
        self.store
            .lock()
            .ok()
            .and_then(|s| s.traces.get(&trace_id).cloned())
            .unwrap_or_default()
    }
}

impl SpanExporter for MemoryExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        let mut guard = self
            .store
            .lock()
            .map_err(|_| ExportError::Rejected("memory store poisoned".to_owned()))?;
        let store = &mut *guard;
        for span in batch.spans {
            let trace_id = span.trace_id;
            store
                .traces
                .entry(trace_id)
                .or_insert_with(|| {
                    store.order.push_back(trace_id);
                    Vec::new()
                })
                .push(span);
        }
        while store.order.len() > self.max_traces {
            if let Some(evicted) = store.order.pop_front() {
                store.traces.remove(&evicted);
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Discards all spans (for benchmarking)
pub struct NullExporter;

impl SpanExporter for NullExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Records all exported spans for verification
#[cfg(test)]
#[derive(Default)]
pub struct TestExporter {
    spans: Mutex<Vec<Span>>,
}

#[cfg(test)]
impl TestExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }

    pub fn all_spans(&self) -> Vec<Span> {
        self.spans.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl SpanExporter for TestExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "test"
    }
}

/// Sleeps before recording, for drain-deadline tests
#[cfg(test)]
pub struct SlowExporter {
    delay: std::time::Duration,
    spans: Mutex<Vec<Span>>,
}

#[cfg(test)]
impl SlowExporter {
    pub fn new(delay: std::time::Duration) -> Self {
        Self {
            delay,
            spans: Mutex::new(Vec::new()),
        }
    }

    pub fn exported_count(&self) -> usize {
        self.spans.lock().unwrap().len()
    }
}

#[cfg(test)]
impl SpanExporter for SlowExporter {
    async fn export(&self, batch: SpanBatch) -> Result<(), ExportError> {
        tokio::time::sleep(self.delay).await;
        self.spans.lock().unwrap().extend(batch.spans);
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Fails every batch
#[cfg(test)]
pub struct FailingExporter;

#[cfg(test)]
impl SpanExporter for FailingExporter {
    async fn export(&self, _batch: SpanBatch) -> Result<(), ExportError> {
        Err(ExportError::Transport("connection refused".to_owned()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}
