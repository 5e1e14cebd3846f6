use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::processor::{apply_processors, SpanProcessor};
use crate::queue::AdaptiveQueue;
use crate::span::SpanBatch;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Thread-safe export counters shared by every worker (relaxed atomics).
#[derive(Debug, Default)]
pub struct ExportMetrics {
    /// Spans accepted by an exporter, counted once per exporter
    pub spans_exported: AtomicU64,
    pub batches_exported: AtomicU64,
    pub export_errors: AtomicU64,
    /// Failures that could not be reported because the error channel was full
    pub failures_unreported: AtomicU64,
    pub inflight_exports: AtomicU64,
}

impl ExportMetrics {
    pub fn spans_exported(&self) -> u64 {
        self.spans_exported.load(Ordering::Relaxed)
    }

    pub fn batches_exported(&self) -> u64 {
        self.batches_exported.load(Ordering::Relaxed)
    }

    pub fn export_errors(&self) -> u64 {
        self.export_errors.load(Ordering::Relaxed)
    }

    pub fn failures_unreported(&self) -> u64 {
        self.failures_unreported.load(Ordering::Relaxed)
    }

    pub fn inflight_exports(&self) -> u64 {
        self.inflight_exports.load(Ordering::Relaxed)
    }

    fn record_success(&self, span_count: u64) {
        self.spans_exported.fetch_add(span_count, Ordering::Relaxed);
        self.batches_exported.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.export_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counts one export as in flight until dropped, including when the
/// exporting task is aborted.
struct InflightGuard<'a>(&'a ExportMetrics);

impl<'a> InflightGuard<'a> {
    fn new(metrics: &'a ExportMetrics) -> Self {
        metrics.inflight_exports.fetch_add(1, Ordering::Relaxed);
        Self(metrics)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.inflight_exports.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One exporter's failure on one batch, as sent to the error channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFailure {
    pub exporter: String,
    pub error: ExportError,
    /// Spans in the failed batch
    pub spans: usize,
}

/// A pipeline's processors followed by an ordered fan-out to its exporters.
///
/// Each exporter gets exactly one attempt per batch. A failure is logged,
/// counted and reported on the error channel; the remaining exporters still
/// receive the batch.
pub struct ExporterChain {
    processors: Vec<Box<dyn SpanProcessor>>,
    exporters: Vec<Arc<dyn SpanExporterBoxed>>,
    failures: Option<mpsc::Sender<ExportFailure>>,
    metrics: Arc<ExportMetrics>,
}

impl ExporterChain {
    pub fn new(exporters: Vec<Arc<dyn SpanExporterBoxed>>) -> Self {
        Self {
            processors: Vec::new(),
            exporters,
            failures: None,
            metrics: Arc::new(ExportMetrics::default()),
        }
    }

    /// Runs `processors` in order on every batch before export.
    pub fn with_processors(mut self, processors: Vec<Box<dyn SpanProcessor>>) -> Self {
        self.processors = processors;
        self
    }

    /// Reports failures on `tx` with a non-blocking send.
    pub fn with_failure_channel(mut self, tx: mpsc::Sender<ExportFailure>) -> Self {
        self.failures = Some(tx);
        self
    }

    pub fn exporter_names(&self) -> Vec<&str> {
        self.exporters.iter().map(|e| e.name()).collect()
    }

    pub fn metrics(&self) -> &Arc<ExportMetrics> {
        &self.metrics
    }

    pub fn processor_names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Processes `batch` and forwards the result to every exporter,
    /// returning how many exports failed.
    pub async fn export(&self, batch: SpanBatch) -> usize {
        if self.exporters.is_empty() {
            return 0;
        }
        let _inflight = InflightGuard::new(&self.metrics);
        let mut failed = 0;
        for batch in apply_processors(&self.processors, batch) {
            failed += self.fan_out(batch).await;
        }
        failed
    }

    async fn fan_out(&self, batch: SpanBatch) -> usize {
        let Some((last, rest)) = self.exporters.split_last() else {
            return 0;
        };
        let span_count = batch.len();
        let mut failed = 0;
        for exporter in rest {
            if !self.export_one(exporter.as_ref(), batch.clone(), span_count).await {
                failed += 1;
            }
        }
        if !self.export_one(last.as_ref(), batch, span_count).await {
            failed += 1;
        }
        failed
    }

    async fn export_one(
        &self,
        exporter: &dyn SpanExporterBoxed,
        batch: SpanBatch,
        span_count: usize,
    ) -> bool {
        match exporter.export_boxed(batch).await {
            Ok(()) => {
                self.metrics.record_success(span_count as u64);
                true
            }
            Err(error) => {
                self.metrics.record_error();
                warn!(exporter = exporter.name(), spans = span_count, error = %error, "export failed");
                self.report(ExportFailure {
                    exporter: exporter.name().to_owned(),
                    error,
                    spans: span_count,
                });
                false
            }
        }
    }

    fn report(&self, failure: ExportFailure) {
        let Some(tx) = &self.failures else {
            return;
        };
        if tx.try_send(failure).is_err() {
            self.metrics
                .failures_unreported
                .fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Outcome of [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Every queued batch was forwarded before the deadline
    pub completed: bool,
    /// Batches still queued when the deadline elapsed
    pub dropped: usize,
    /// Exports cut short when the remaining workers were aborted
    pub interrupted: usize,
}

/// Fixed set of workers pulling from one shared queue.
pub struct WorkerPool {
    queue: Arc<AdaptiveQueue<SpanBatch>>,
    chain: Arc<ExporterChain>,
    workers: JoinSet<()>,
    num_workers: usize,
}

async fn run_worker(
    id: usize,
    queue: Arc<AdaptiveQueue<SpanBatch>>,
    chain: Arc<ExporterChain>,
) {
    while let Some(queued) = queue.dequeue().await {
        chain.export(queued.item).await;
    }
    debug!(worker = id, "worker stopped");
}

impl WorkerPool {
    /// Spawns `num_workers` workers (at least one) on the current runtime.
    pub fn start(
        queue: Arc<AdaptiveQueue<SpanBatch>>,
        chain: Arc<ExporterChain>,
        num_workers: usize,
    ) -> Self {
        let num_workers = num_workers.max(1);
        let mut workers = JoinSet::new();
        for id in 0..num_workers {
            workers.spawn(run_worker(id, Arc::clone(&queue), Arc::clone(&chain)));
        }
        info!(
            workers = num_workers,
            processors = ?chain.processor_names(),
            exporters = ?chain.exporter_names(),
            "worker pool started"
        );
        Self {
            queue,
            chain,
            workers,
            num_workers,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn queue(&self) -> &Arc<AdaptiveQueue<SpanBatch>> {
        &self.queue
    }

    pub fn export_metrics(&self) -> &Arc<ExportMetrics> {
        self.chain.metrics()
    }

    /// Stops admissions and drains the queue, bounded by `deadline`.
    ///
    /// When the deadline elapses the queue is closed, its remaining batches
    /// are dropped and the workers are aborted. The loss is logged at `warn`
    /// and returned in the report.
    pub async fn shutdown(mut self, deadline: Duration) -> DrainReport {
        self.queue.begin_drain();
        info!(queued = self.queue.len(), ?deadline, "draining worker pool");

        let workers = &mut self.workers;
        let drained = tokio::time::timeout(deadline, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "worker task failed");
                }
            }
        })
        .await;

        if drained.is_ok() {
            info!("worker pool drained");
            return DrainReport {
                completed: true,
                dropped: 0,
                interrupted: 0,
            };
        }

        let dropped = self.queue.close();
        let interrupted = self.chain.metrics().inflight_exports() as usize;
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}

        warn!(
            dropped,
            interrupted,
            ?deadline,
            "shutdown deadline elapsed, dropping undelivered batches"
        );
        DrainReport {
            completed: false,
            dropped,
            interrupted,
        }
    }
}
