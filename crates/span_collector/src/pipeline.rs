//! Turns a finalized [`ServiceConfig`] into a running traces pipeline.
//!
//! One [`AdaptiveQueue`] and one [`WorkerPool`] per pipeline. Exporters are
//! built by type through [`ExporterFactory`] trait objects so storage drivers
//! plug in without this crate knowing about them.

use crate::connection_age::{ConnectionAgePolicy, ConnectionTracker};
use crate::exporter::{ExportError, SpanExporterBoxed};
use crate::processor::{BatchProcessor, ProcessorConfigError, ResourceProcessor, SpanProcessor};
use crate::queue::{AdaptiveQueue, EnqueueError, QueueConfig, QueueMetrics, QueueState};
use crate::span::SpanBatch;
use crate::worker_pool::{DrainReport, ExportFailure, ExportMetrics, ExporterChain, WorkerPool};
use pipeline_config::components::{BATCH_PROCESSOR, RESOURCE_PROCESSOR};
use pipeline_config::{
    component_type, CollectorOptions, DataKind, ServiceConfig, Value, TRACES_PIPELINE,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

/// Capacity of the process-level export failure channel.
pub const DEFAULT_FAILURE_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("service has no `{0}` pipeline")]
    MissingPipeline(String),
    #[error("pipeline `{pipeline}` carries {data_kind}, only traces are supported")]
    UnsupportedDataKind {
        pipeline: String,
        data_kind: DataKind,
    },
    #[error("no exporter factory for `{type_name}` (component {name})")]
    NoExporterFactory { name: String, type_name: String },
    #[error("component {0} is referenced but not configured")]
    MissingComponent(String),
    #[error("failed to create exporter {name}: {source}")]
    Exporter {
        name: String,
        #[source]
        source: ExportError,
    },
    #[error("processor type `{0}` is not supported at runtime")]
    UnsupportedProcessor(String),
    #[error(transparent)]
    ProcessorConfig(#[from] ProcessorConfigError),
}

pub type CreateResult = Result<Arc<dyn SpanExporterBoxed>, ExportError>;

/// Builds exporters of one registered type.
pub trait ExporterFactory: Send + Sync {
    /// `name` is the full component name (`type[/instance]`), `config` its
    /// section from the service configuration.
    fn create(&self, name: &str, config: &Value) -> CreateResult;
}

impl<F> ExporterFactory for F
where
    F: Fn(&str, &Value) -> CreateResult + Send + Sync,
{
    fn create(&self, name: &str, config: &Value) -> CreateResult {
        self(name, config)
    }
}

/// Exporter factories keyed by component type.
#[derive(Default)]
pub struct ExporterFactories {
    by_type: HashMap<String, Box<dyn ExporterFactory>>,
}

impl ExporterFactories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `type_name`, replacing any previous one.
    pub fn register(
        mut self,
        type_name: impl Into<String>,
        factory: impl ExporterFactory + 'static,
    ) -> Self {
        self.by_type.insert(type_name.into(), Box::new(factory));
        self
    }

    pub fn get(&self, type_name: &str) -> Option<&dyn ExporterFactory> {
        self.by_type.get(type_name).map(AsRef::as_ref)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.by_type.contains_key(type_name)
    }

    fn build(&self, name: &str, config: &Value) -> Result<Arc<dyn SpanExporterBoxed>, BuildError> {
        let type_name = component_type(name);
        let factory = self.get(type_name).ok_or_else(|| BuildError::NoExporterFactory {
            name: name.to_owned(),
            type_name: type_name.to_owned(),
        })?;
        factory.create(name, config).map_err(|source| BuildError::Exporter {
            name: name.to_owned(),
            source,
        })
    }
}

/// Runtime sizing for a pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeOptions {
    pub queue: QueueConfig,
    pub num_workers: usize,
    pub shutdown_timeout: Duration,
    pub failure_channel_capacity: usize,
    pub connection_age: ConnectionAgePolicy,
}

impl RuntimeOptions {
    pub fn from_options(options: &CollectorOptions) -> Self {
        Self {
            queue: QueueConfig::from_options(options.queue_size, options.queue_budget_bytes()),
            num_workers: options.num_workers,
            shutdown_timeout: options.shutdown_timeout,
            failure_channel_capacity: DEFAULT_FAILURE_CHANNEL_CAPACITY,
            connection_age: ConnectionAgePolicy::from_options(options),
        }
    }
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_options(&CollectorOptions::default())
    }
}

/// Producer handle for receivers.
///
/// A receiver turns `QueueFull` and `QueueClosed` into its own wire-level
/// backpressure response instead of buffering.
#[derive(Clone)]
pub struct Ingress {
    queue: Arc<AdaptiveQueue<SpanBatch>>,
}

impl Ingress {
    /// Submits one batch; never blocks.
    pub fn submit(&self, batch: SpanBatch) -> Result<(), EnqueueError> {
        self.queue.enqueue(batch)
    }

    pub fn is_accepting(&self) -> bool {
        self.queue.state() == QueueState::Open
    }
}

fn build_processor(name: &str, config: &Value) -> Result<Box<dyn SpanProcessor>, BuildError> {
    match component_type(name) {
        RESOURCE_PROCESSOR => Ok(Box::new(ResourceProcessor::from_config(name, config)?)),
        BATCH_PROCESSOR => Ok(Box::new(BatchProcessor::from_config(name, config)?)),
        other => Err(BuildError::UnsupportedProcessor(other.to_owned())),
    }
}

/// A running traces pipeline.
pub struct Pipeline {
    queue: Arc<AdaptiveQueue<SpanBatch>>,
    pool: WorkerPool,
    failures: Option<mpsc::Receiver<ExportFailure>>,
    options: RuntimeOptions,
}

impl Pipeline {
    /// Builds processors and exporters for the traces pipeline and starts
    /// its workers on the current tokio runtime.
    pub fn build(
        config: &ServiceConfig,
        factories: &ExporterFactories,
        options: RuntimeOptions,
    ) -> Result<Self, BuildError> {
        let pipeline = config
            .pipeline(TRACES_PIPELINE)
            .ok_or_else(|| BuildError::MissingPipeline(TRACES_PIPELINE.to_owned()))?;
        if pipeline.data_kind != DataKind::Traces {
            return Err(BuildError::UnsupportedDataKind {
                pipeline: TRACES_PIPELINE.to_owned(),
                data_kind: pipeline.data_kind,
            });
        }

        let processors = pipeline
            .processors
            .iter()
            .map(|name| {
                let section = config
                    .processors
                    .get(name)
                    .ok_or_else(|| BuildError::MissingComponent(name.clone()))?;
                build_processor(name, section)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let exporters = pipeline
            .exporters
            .iter()
            .map(|name| {
                let section = config
                    .exporters
                    .get(name)
                    .ok_or_else(|| BuildError::MissingComponent(name.clone()))?;
                factories.build(name, section)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, rx) = mpsc::channel(options.failure_channel_capacity.max(1));
        let chain = Arc::new(
            ExporterChain::new(exporters)
                .with_processors(processors)
                .with_failure_channel(tx),
        );
        let queue = Arc::new(AdaptiveQueue::new(options.queue));
        let pool = WorkerPool::start(Arc::clone(&queue), chain, options.num_workers);

        info!(
            pipeline = TRACES_PIPELINE,
            queue = ?options.queue.mode,
            workers = pool.num_workers(),
            "pipeline started"
        );
        Ok(Self {
            queue,
            pool,
            failures: Some(rx),
            options,
        })
    }

    pub fn ingress(&self) -> Ingress {
        Ingress {
            queue: Arc::clone(&self.queue),
        }
    }

    /// Takes the export failure receiver; later calls return `None`.
    pub fn take_failures(&mut self) -> Option<mpsc::Receiver<ExportFailure>> {
        self.failures.take()
    }

    pub fn queue_metrics(&self) -> &QueueMetrics {
        self.queue.metrics()
    }

    pub fn export_metrics(&self) -> &Arc<ExportMetrics> {
        self.pool.export_metrics()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// A connection tracker for receivers of this pipeline.
    pub fn connection_tracker(&self) -> ConnectionTracker {
        ConnectionTracker::new(self.options.connection_age)
    }

    /// Drains the pipeline within the configured shutdown timeout.
    pub async fn shutdown(self) -> DrainReport {
        self.pool.shutdown(self.options.shutdown_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{MemoryExporter, NullExporter};
    use pipeline_config::{build_service_config, components, Options, Role};

    fn service(storage: &str, options: &Options) -> ServiceConfig {
        let registry = components(options).unwrap();
        build_service_config(&registry, options, Role::Collector, storage, None).unwrap()
    }

    fn null_factories(types: &[&str]) -> ExporterFactories {
        types.iter().fold(ExporterFactories::new(), |f, t| {
            f.register(*t, |_: &str, _: &Value| -> CreateResult { Ok(Arc::new(NullExporter)) })
        })
    }

    #[tokio::test]
    async fn test_build_and_submit() {
        let options = Options::default();
        let config = service("cassandra,elasticsearch", &options);
        let pipeline = Pipeline::build(
            &config,
            &null_factories(&["cassandra", "elasticsearch"]),
            RuntimeOptions::default(),
        )
        .unwrap();

        let ingress = pipeline.ingress();
        assert!(ingress.is_accepting());
        ingress.submit(SpanBatch::new()).unwrap();
        let metrics = Arc::clone(pipeline.export_metrics());

        let report = pipeline.shutdown().await;
        assert!(report.completed);
        // One batch, two exporters.
        assert_eq!(metrics.batches_exported(), 2);
        assert_eq!(ingress.submit(SpanBatch::new()), Err(EnqueueError::QueueClosed));
    }

    #[tokio::test]
    async fn test_missing_factory() {
        let config = service("kafka", &Options::default());
        let err = Pipeline::build(&config, &null_factories(&["cassandra"]), RuntimeOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::NoExporterFactory { ref type_name, .. } if type_name == "kafka"));
    }

    #[tokio::test]
    async fn test_non_trace_pipeline_rejected() {
        let options = Options::default();
        let registry = components(&options).unwrap();
        let overlay = pipeline_config::parse_override(
            "service:\n  pipelines:\n    traces:\n      data_type: metrics",
        )
        .unwrap();
        let config =
            build_service_config(&registry, &options, Role::Collector, "cassandra", Some(overlay))
                .unwrap();

        let err = Pipeline::build(&config, &null_factories(&["cassandra"]), RuntimeOptions::default())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::UnsupportedDataKind { data_kind: DataKind::Metrics, .. }
        ));
    }

    #[tokio::test]
    async fn test_factory_error_is_reported() {
        let config = service("memory", &Options::default());
        let factories = ExporterFactories::new().register("memory", |_: &str, _: &Value| -> CreateResult {
            Err(ExportError::Rejected("bad config".to_owned()))
        });
        let err = Pipeline::build(&config, &factories, RuntimeOptions::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("failed to create exporter memory"));
    }

    #[tokio::test]
    async fn test_factory_sees_component_config() {
        let config = service("memory", &Options::default());
        let store = Arc::new(MemoryExporter::new("memory", 10));
        let handle = Arc::clone(&store);
        let factories = ExporterFactories::new().register("memory", move |name: &str, cfg: &Value| -> CreateResult {
            assert_eq!(name, "memory");
            assert!(cfg.get("max_traces").is_some());
            Ok(handle.clone())
        });

        let pipeline = Pipeline::build(&config, &factories, RuntimeOptions::default()).unwrap();
        let span = crate::span::Span::new(42, 1, 0, "op", crate::span::SpanKind::Server);
        pipeline.ingress().submit(SpanBatch::with_spans(vec![span])).unwrap();
        pipeline.shutdown().await;
        assert_eq!(store.trace(42).len(), 1);
    }

    #[tokio::test]
    async fn test_resource_tags_reach_exporter() {
        let mut options = Options::default();
        options.collector.tags = "env=prod".to_owned();
        let config = service("memory", &options);
        let store = Arc::new(MemoryExporter::new("memory", 10));
        let handle = Arc::clone(&store);
        let factories = ExporterFactories::new().register("memory", move |_: &str, _: &Value| -> CreateResult {
            Ok(handle.clone())
        });

        let pipeline = Pipeline::build(&config, &factories, RuntimeOptions::default()).unwrap();
        let span = crate::span::Span::new(7, 1, 0, "op", crate::span::SpanKind::Server);
        pipeline.ingress().submit(SpanBatch::with_spans(vec![span])).unwrap();
        pipeline.shutdown().await;

        let stored = store.trace(7);
        assert_eq!(
            stored[0].attributes.get("env"),
            Some(&crate::span::AttributeValue::String("prod".to_owned()))
        );
    }

    #[test]
    fn test_runtime_options_follow_collector_options() {
        let mut options = CollectorOptions::default();
        options.queue_size_memory_mib = 2;
        options.num_workers = 3;
        let runtime = RuntimeOptions::from_options(&options);
        assert_eq!(runtime.queue, QueueConfig::memory_budget(2 * 1024 * 1024));
        assert_eq!(runtime.num_workers, 3);
        assert_eq!(RuntimeOptions::default().queue, QueueConfig::fixed(2000));
    }
}
