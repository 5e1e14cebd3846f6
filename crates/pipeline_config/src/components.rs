//! Built-in component factories.
//!
//! Start-up options are folded into factory defaults here, at registration
//! time, so the assembler only ever asks the registry for defaults.

use crate::error::Result;
use crate::options::Options;
use crate::registry::{with_defaults, ComponentFactory, Registry};
use crate::sampling::resolve_sampling_source;
use crate::value::Value;

// Receivers
pub const JAEGER_RECEIVER: &str = "jaeger";
pub const ZIPKIN_RECEIVER: &str = "zipkin";
pub const OTLP_RECEIVER: &str = "otlp";
pub const KAFKA_RECEIVER: &str = "kafka";

// Processors
pub const BATCH_PROCESSOR: &str = "batch";
pub const RESOURCE_PROCESSOR: &str = "resource";

// Exporters
pub const CASSANDRA_EXPORTER: &str = "cassandra";
pub const ELASTICSEARCH_EXPORTER: &str = "elasticsearch";
pub const KAFKA_EXPORTER: &str = "kafka";
pub const GRPC_PLUGIN_EXPORTER: &str = "grpc-plugin";
pub const MEMORY_EXPORTER: &str = "memory";
/// Upstream forwarder used by agents.
pub const JAEGER_EXPORTER: &str = "jaeger";

// Extensions
pub const HEALTH_CHECK_EXTENSION: &str = "health_check";

fn jaeger_receiver() -> ComponentFactory {
    ComponentFactory::receiver(JAEGER_RECEIVER, Value::mapping().with("protocols", Value::mapping()))
}

fn zipkin_receiver() -> ComponentFactory {
    ComponentFactory::receiver(ZIPKIN_RECEIVER, Value::mapping().with("endpoint", ":9411"))
}

fn otlp_receiver() -> ComponentFactory {
    ComponentFactory::receiver(
        OTLP_RECEIVER,
        Value::mapping().with(
            "protocols",
            Value::mapping()
                .with("grpc", Value::mapping().with("endpoint", ":4317"))
                .with("http", Value::mapping().with("endpoint", ":4318")),
        ),
    )
}

fn kafka_receiver() -> ComponentFactory {
    ComponentFactory::receiver(
        KAFKA_RECEIVER,
        Value::mapping()
            .with("brokers", vec!["127.0.0.1:9092"])
            .with("topic", "jaeger-spans")
            .with("encoding", "protobuf"),
    )
}

fn batch_processor() -> ComponentFactory {
    ComponentFactory::processor(
        BATCH_PROCESSOR,
        Value::mapping()
            .with("send_batch_size", 8192_i64)
            .with("timeout", "200ms"),
    )
}

fn resource_processor() -> ComponentFactory {
    ComponentFactory::processor(RESOURCE_PROCESSOR, Value::mapping().with("labels", Value::mapping()))
}

fn storage_exporters() -> Vec<ComponentFactory> {
    vec![
        ComponentFactory::exporter(
            CASSANDRA_EXPORTER,
            Value::mapping()
                .with("servers", vec!["127.0.0.1"])
                .with("keyspace", "jaeger_v1_test"),
        ),
        ComponentFactory::exporter(
            ELASTICSEARCH_EXPORTER,
            Value::mapping()
                .with("server_urls", vec!["http://127.0.0.1:9200"])
                .with("index_prefix", ""),
        ),
        ComponentFactory::exporter(
            KAFKA_EXPORTER,
            Value::mapping()
                .with("brokers", vec!["127.0.0.1:9092"])
                .with("topic", "jaeger-spans")
                .with("encoding", "protobuf"),
        ),
        ComponentFactory::exporter(
            GRPC_PLUGIN_EXPORTER,
            Value::mapping()
                .with("binary", "")
                .with("configuration_file", ""),
        ),
        ComponentFactory::exporter(
            MEMORY_EXPORTER,
            Value::mapping().with("max_traces", 100_000_i64),
        ),
    ]
}

fn jaeger_exporter() -> ComponentFactory {
    ComponentFactory::exporter(JAEGER_EXPORTER, Value::mapping().with("endpoint", ""))
}

fn health_check_extension() -> ComponentFactory {
    ComponentFactory::extension(HEALTH_CHECK_EXTENSION, Value::mapping().with("port", 13133_i64))
}

/// Builds the registry of every built-in component, with defaults taken from `options`.
pub fn components(options: &Options) -> Result<Registry> {
    let labels: Value = options.collector.parsed_tags()?.into_iter().collect();
    let resource = with_defaults(resource_processor(), Value::mapping().with("labels", labels));

    let mut jaeger = jaeger_receiver();
    if let Some(sampling) = resolve_sampling_source(
        options.agent.sampling_strategies_file.as_deref(),
        &options.agent.reporter_host_ports,
    ) {
        jaeger = with_defaults(
            jaeger,
            Value::mapping().with("remote_sampling", sampling.to_value()),
        );
    }

    let kafka = with_defaults(
        kafka_receiver(),
        Value::mapping()
            .with("brokers", options.ingester.kafka_brokers.clone())
            .with("topic", options.ingester.kafka_topic.as_str())
            .with("encoding", options.ingester.kafka_encoding.as_str()),
    );

    let mut builder = Registry::builder()
        .register(jaeger)
        .register(zipkin_receiver())
        .register(otlp_receiver())
        .register(kafka)
        .register(batch_processor())
        .register(resource)
        .register(jaeger_exporter())
        .register(health_check_extension());
    for exporter in storage_exporters() {
        builder = builder.register(exporter);
    }
    builder.build()
}
