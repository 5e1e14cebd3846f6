//! Span collector runtime
//!
//! Receivers submit span batches into a bounded [`AdaptiveQueue`] through an
//! [`Ingress`] handle; a fixed [`WorkerPool`] drains the queue, runs the
//! pipeline's processors and fans each batch out to every exporter.
//!
//! The topology comes from a [`pipeline_config::ServiceConfig`];
//! [`Pipeline::build`] turns it into running components.
//!
//! # Example
//!
//! ```no_run
//! use span_collector::{
//!     CreateResult, ExporterFactories, LoggingExporter, Pipeline, RuntimeOptions, SpanBatch,
//! };
//! use pipeline_config::{build_service_config, components, Options, Role, Value};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let options = Options::default();
//! let registry = components(&options)?;
//! let config = build_service_config(&registry, &options, Role::Collector, "cassandra", None)?;
//!
//! let factories = ExporterFactories::new().register("cassandra", |name: &str, _: &Value| -> CreateResult {
//!     Ok(Arc::new(LoggingExporter::new(name)))
//! });
//! let pipeline = Pipeline::build(&config, &factories, RuntimeOptions::default())?;
//!
//! pipeline.ingress().submit(SpanBatch::new())?;
//! let report = pipeline.shutdown().await;
//! assert!(report.completed);
//! # Ok(())
//! # }
//! ```

pub mod connection_age;
pub mod exporter;
mod invariants;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod span;
pub mod worker_pool;

pub use connection_age::{ConnectionAction, ConnectionAgePolicy, ConnectionId, ConnectionTracker};
pub use exporter::{
    ExportError, LoggingExporter, MemoryExporter, NullExporter, SpanExporter, SpanExporterBoxed,
};
pub use pipeline::{
    BuildError, CreateResult, ExporterFactories, ExporterFactory, Ingress, Pipeline,
    RuntimeOptions,
};
pub use processor::{BatchProcessor, ResourceProcessor, SpanProcessor};
pub use queue::{
    AdaptiveQueue, EnqueueError, QueueConfig, QueueItem, QueueMetrics, QueueMode, QueueState,
};
pub use span::{AttributeValue, EstimateSize, Span, SpanBatch, SpanKind, SpanStatus};
pub use worker_pool::{DrainReport, ExportFailure, ExportMetrics, ExporterChain, WorkerPool};
