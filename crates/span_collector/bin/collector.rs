//! Span collector process
//!
//! Builds the service configuration for the selected role, prints it or runs
//! the pipeline until interrupted.
//!
//! Usage:
//!   collector collector --span-storage-type cassandra,elasticsearch
//!   collector agent --reporter.grpc.host-port collector:14250
//!   collector ingester --config-file overrides.yaml --print-config

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pipeline_config::components::MEMORY_EXPORTER;
use pipeline_config::options::{
    parse_host_ports, DEFAULT_GRPC_MAX_RECEIVE_MESSAGE_LENGTH, DEFAULT_NUM_WORKERS,
    DEFAULT_QUEUE_SIZE,
};
use pipeline_config::{
    build_service_config, components, load_override, AgentOptions, CollectorOptions,
    ComponentKind, IngesterOptions, Options, Registry, Role, Value, DEFAULT_STORAGE_TYPE,
    SPAN_STORAGE_TYPE_ENV,
};
use span_collector::{
    CreateResult, ExporterFactories, LoggingExporter, MemoryExporter, Pipeline, RuntimeOptions,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_MEMORY_MAX_TRACES: usize = 100_000;

#[derive(Parser, Debug)]
#[command(name = "collector", version, about = "Span collector, agent and ingester")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// YAML document merged over the default configuration
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Comma-separated storage backends
    #[arg(long, env = SPAN_STORAGE_TYPE_ENV, default_value = DEFAULT_STORAGE_TYPE, global = true)]
    span_storage_type: String,

    /// Print the final configuration as YAML and exit
    #[arg(long, global = true)]
    print_config: bool,

    #[command(flatten)]
    collector: CollectorFlags,

    #[command(flatten)]
    agent: AgentFlags,

    #[command(flatten)]
    ingester: IngesterFlags,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Receive spans from clients and write them to storage
    Collector,
    /// Forward spans to an upstream collector
    Agent,
    /// Read spans from the message bus and write them to storage
    Ingester,
}

impl Command {
    fn role(self) -> Role {
        match self {
            Command::Collector => Role::Collector,
            Command::Agent => Role::Agent,
            Command::Ingester => Role::Ingester,
        }
    }
}

#[derive(Args, Debug)]
struct CollectorFlags {
    #[arg(long = "collector.num-workers", default_value_t = DEFAULT_NUM_WORKERS, global = true)]
    num_workers: usize,

    #[arg(long = "collector.queue-size", default_value_t = DEFAULT_QUEUE_SIZE, global = true)]
    queue_size: usize,

    /// Memory budget for the queue in MiB; 0 keeps the fixed-size queue
    #[arg(long = "collector.queue-size-memory", default_value_t = 0, global = true)]
    queue_size_memory: u64,

    #[arg(long = "collector.grpc-server.host-port", default_value = ":14250", global = true)]
    grpc_host_port: String,

    /// Largest gRPC message the server accepts, in bytes
    #[arg(long = "collector.grpc-server.max-message-size", default_value_t = DEFAULT_GRPC_MAX_RECEIVE_MESSAGE_LENGTH, global = true)]
    max_receive_message_length: usize,

    #[arg(long = "collector.http-server.host-port", default_value = ":14268", global = true)]
    http_host_port: String,

    /// Zipkin listener; empty disables the receiver
    #[arg(long = "collector.zipkin.host-port", default_value = "", global = true)]
    zipkin_host_port: String,

    /// key=value pairs added to every span; values may use ${ENV:default}
    #[arg(long = "collector.tags", default_value = "", global = true)]
    tags: String,

    #[arg(long = "collector.grpc-server.max-connection-age", value_parser = humantime::parse_duration, default_value = "0s", global = true)]
    max_connection_age: Duration,

    #[arg(long = "collector.grpc-server.max-connection-age-grace", value_parser = humantime::parse_duration, default_value = "0s", global = true)]
    max_connection_age_grace: Duration,

    /// Upper bound on draining the queue at shutdown
    #[arg(long = "collector.shutdown-timeout", value_parser = humantime::parse_duration, default_value = "5s", global = true)]
    shutdown_timeout: Duration,
}

impl CollectorFlags {
    fn to_options(&self) -> CollectorOptions {
        CollectorOptions {
            num_workers: self.num_workers,
            queue_size: self.queue_size,
            queue_size_memory_mib: self.queue_size_memory,
            grpc_host_port: self.grpc_host_port.clone(),
            http_host_port: self.http_host_port.clone(),
            zipkin_host_port: self.zipkin_host_port.clone(),
            tags: self.tags.clone(),
            max_receive_message_length: self.max_receive_message_length,
            max_connection_age: self.max_connection_age,
            max_connection_age_grace: self.max_connection_age_grace,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

#[derive(Args, Debug)]
struct AgentFlags {
    #[arg(long = "processor.jaeger-compact.server-host-port", default_value = ":6831", global = true)]
    thrift_compact_host_port: String,

    #[arg(long = "processor.jaeger-binary.server-host-port", default_value = ":6832", global = true)]
    thrift_binary_host_port: String,

    /// Comma-separated upstream collectors
    #[arg(long = "reporter.grpc.host-port", default_value = "", global = true)]
    reporter_host_ports: String,

    #[arg(long = "sampling.strategies-file", global = true)]
    sampling_strategies_file: Option<PathBuf>,
}

impl AgentFlags {
    fn to_options(&self) -> AgentOptions {
        AgentOptions {
            thrift_compact_host_port: self.thrift_compact_host_port.clone(),
            thrift_binary_host_port: self.thrift_binary_host_port.clone(),
            reporter_host_ports: parse_host_ports(&self.reporter_host_ports),
            sampling_strategies_file: self.sampling_strategies_file.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct IngesterFlags {
    /// Comma-separated Kafka brokers
    #[arg(long = "kafka.consumer.brokers", default_value = "127.0.0.1:9092", global = true)]
    kafka_brokers: String,

    #[arg(long = "kafka.consumer.topic", default_value = "jaeger-spans", global = true)]
    kafka_topic: String,

    #[arg(long = "kafka.consumer.encoding", default_value = "protobuf", global = true)]
    kafka_encoding: String,
}

impl IngesterFlags {
    fn to_options(&self) -> IngesterOptions {
        IngesterOptions {
            kafka_brokers: parse_host_ports(&self.kafka_brokers),
            kafka_topic: self.kafka_topic.clone(),
            kafka_encoding: self.kafka_encoding.clone(),
        }
    }
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            collector: self.collector.to_options(),
            agent: self.agent.to_options(),
            ingester: self.ingester.to_options(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let role = cli.command.role();
    let options = cli.options();
    let registry = components(&options).context("failed to register components")?;

    let overlay = cli
        .config_file
        .as_deref()
        .map(load_override)
        .transpose()
        .context("failed to load configuration file")?;
    let config = build_service_config(&registry, &options, role, &cli.span_storage_type, overlay)
        .with_context(|| format!("failed to build {role} configuration"))?;

    if cli.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let runtime = RuntimeOptions::from_options(&options.collector);
    let mut pipeline = Pipeline::build(&config, &exporter_factories(&registry), runtime)?;
    info!(%role, queue_capacity = pipeline.queue_capacity(), "running until interrupted");

    if let Some(mut failures) = pipeline.take_failures() {
        tokio::spawn(async move {
            while let Some(failure) = failures.recv().await {
                error!(
                    exporter = %failure.exporter,
                    spans = failure.spans,
                    error = %failure.error,
                    "span export failed"
                );
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, draining queue");

    let report = pipeline.shutdown().await;
    if report.completed {
        info!("queue drained");
    } else {
        warn!(
            dropped = report.dropped,
            interrupted = report.interrupted,
            "shutdown deadline elapsed before the queue drained"
        );
    }
    Ok(())
}

/// Memory exporters keep traces in process; every other backend logs what
/// it would have written.
fn exporter_factories(registry: &Registry) -> ExporterFactories {
    registry
        .types(ComponentKind::Exporter)
        .fold(ExporterFactories::new(), |factories, type_name| {
            if type_name == MEMORY_EXPORTER {
                factories.register(type_name, |name: &str, config: &Value| -> CreateResult {
                    let max_traces = config
                        .get("max_traces")
                        .and_then(Value::as_i64)
                        .and_then(|n| usize::try_from(n).ok())
                        .unwrap_or(DEFAULT_MEMORY_MAX_TRACES);
                    Ok(Arc::new(MemoryExporter::new(name, max_traces)))
                })
            } else {
                factories.register(type_name, |name: &str, _: &Value| -> CreateResult {
                    Ok(Arc::new(LoggingExporter::new(name)))
                })
            }
        })
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
