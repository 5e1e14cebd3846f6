//! Default pipeline assembly.
//!
//! Builds the default `ServiceConfig` for a role: receivers feeding the
//! processors feeding the exporters, plus the health-check extension. Role
//! differences are handled in one place by switching on [`Role`].

use crate::components::{
    BATCH_PROCESSOR, HEALTH_CHECK_EXTENSION, JAEGER_EXPORTER, JAEGER_RECEIVER, KAFKA_RECEIVER,
    RESOURCE_PROCESSOR, ZIPKIN_RECEIVER,
};
use crate::error::{ConfigError, Result};
use crate::options::{is_disabled_host_port, normalize_host_port, Options};
use crate::registry::{ComponentKind, Registry};
use crate::service::{DataKind, PipelineConfig, ServiceConfig, TRACES_PIPELINE};
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Deployment role of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Receives spans from clients and writes them to storage
    Collector,
    /// Runs next to applications and forwards to a collector
    Agent,
    /// Reads spans from the message bus and writes them to storage
    Ingester,
}

impl Role {
    /// Whether the role writes to the resolved storage exporters.
    pub fn writes_storage(self) -> bool {
        !matches!(self, Role::Agent)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Collector => "collector",
            Role::Agent => "agent",
            Role::Ingester => "ingester",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "collector" => Ok(Role::Collector),
            "agent" => Ok(Role::Agent),
            "ingester" => Ok(Role::Ingester),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Listener endpoints enabled for the process.
///
/// An empty or `:0` host port omits the corresponding protocol or receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportConfig {
    pub grpc_host_port: String,
    pub http_host_port: String,
    pub zipkin_host_port: String,
    pub thrift_compact_host_port: String,
    pub thrift_binary_host_port: String,
    /// Upstream collectors for the agent's forwarding exporter
    pub reporter_host_ports: Vec<String>,
    /// Written to the grpc protocol as `max_recv_msg_size`; zero leaves it unset
    pub max_receive_message_length: usize,
}

impl TransportConfig {
    pub fn from_options(options: &Options) -> Self {
        Self {
            grpc_host_port: normalize_host_port(&options.collector.grpc_host_port),
            http_host_port: normalize_host_port(&options.collector.http_host_port),
            zipkin_host_port: normalize_host_port(&options.collector.zipkin_host_port),
            thrift_compact_host_port: normalize_host_port(&options.agent.thrift_compact_host_port),
            thrift_binary_host_port: normalize_host_port(&options.agent.thrift_binary_host_port),
            reporter_host_ports: options.agent.reporter_host_ports.clone(),
            max_receive_message_length: options.collector.max_receive_message_length,
        }
    }
}

/// Adds `protocol: {endpoint: host_port}` unless the listener is disabled.
fn add_protocol(protocols: &mut Value, protocol: &str, host_port: &str) {
    if !is_disabled_host_port(host_port) {
        protocols.insert(protocol, Value::mapping().with("endpoint", host_port));
    }
}

/// Assembles default service configurations from registry defaults.
#[derive(Debug, Clone, Copy)]
pub struct Assembler<'a> {
    registry: &'a Registry,
}

impl<'a> Assembler<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Builds and validates the default configuration for `role`.
    ///
    /// `exporters` is the resolved storage set; agents ignore it and forward
    /// to their single upstream exporter instead.
    pub fn assemble(
        &self,
        transport: &TransportConfig,
        exporters: &BTreeSet<String>,
        role: Role,
    ) -> Result<ServiceConfig> {
        if role.writes_storage() && exporters.is_empty() {
            return Err(ConfigError::InvalidTopology(format!(
                "{role} requires at least one storage exporter"
            )));
        }

        let receivers = match role {
            Role::Collector => self.collector_receivers(transport)?,
            Role::Agent => self.agent_receivers(transport)?,
            Role::Ingester => vec![(
                KAFKA_RECEIVER.to_owned(),
                self.default_config(ComponentKind::Receiver, KAFKA_RECEIVER)?,
            )],
        };
        if receivers.is_empty() {
            return Err(ConfigError::InvalidTopology(format!(
                "{role} has no enabled receivers"
            )));
        }

        let mut processors = Vec::new();
        if matches!(role, Role::Collector | Role::Agent) {
            if let Some(resource) = self.resource_processor()? {
                processors.push((RESOURCE_PROCESSOR.to_owned(), resource));
            }
        }
        if role == Role::Collector {
            processors.push((
                BATCH_PROCESSOR.to_owned(),
                self.default_config(ComponentKind::Processor, BATCH_PROCESSOR)?,
            ));
        }

        let exporters = match role {
            Role::Agent => vec![(JAEGER_EXPORTER.to_owned(), self.upstream_exporter(transport)?)],
            Role::Collector | Role::Ingester => exporters
                .iter()
                .map(|name| {
                    self.default_config(ComponentKind::Exporter, name)
                        .map(|cfg| (name.clone(), cfg))
                })
                .collect::<Result<Vec<_>>>()?,
        };

        let mut config = ServiceConfig::default();
        config.extensions.insert(
            HEALTH_CHECK_EXTENSION.to_owned(),
            self.default_config(ComponentKind::Extension, HEALTH_CHECK_EXTENSION)?,
        );
        config.service.extensions = vec![HEALTH_CHECK_EXTENSION.to_owned()];

        let mut pipeline = PipelineConfig::new(DataKind::Traces);
        for (name, cfg) in receivers {
            pipeline.receivers.push(name.clone());
            config.receivers.insert(name, cfg);
        }
        for (name, cfg) in processors {
            pipeline.processors.push(name.clone());
            config.processors.insert(name, cfg);
        }
        for (name, cfg) in exporters {
            pipeline.exporters.push(name.clone());
            config.exporters.insert(name, cfg);
        }
        pipeline.exporters.sort();
        config
            .service
            .pipelines
            .insert(TRACES_PIPELINE.to_owned(), pipeline);

        config.validate(self.registry)?;
        debug!(%role, pipeline = ?config.traces_pipeline(), "assembled default pipeline");
        Ok(config)
    }

    fn default_config(&self, kind: ComponentKind, name: &str) -> Result<Value> {
        self.registry.default_config(kind, name)
    }

    fn collector_receivers(&self, transport: &TransportConfig) -> Result<Vec<(String, Value)>> {
        let mut receivers = Vec::new();

        let mut protocols = Value::mapping();
        add_protocol(&mut protocols, "grpc", &transport.grpc_host_port);
        if transport.max_receive_message_length > 0 {
            if let Some(grpc) = protocols.as_mapping_mut().and_then(|m| m.get_mut("grpc")) {
                let size = i64::try_from(transport.max_receive_message_length).unwrap_or(i64::MAX);
                grpc.insert("max_recv_msg_size", size);
            }
        }
        add_protocol(&mut protocols, "thrift_http", &transport.http_host_port);
        if !protocols.is_empty() {
            let jaeger = self.default_config(ComponentKind::Receiver, JAEGER_RECEIVER)?;
            receivers.push((
                JAEGER_RECEIVER.to_owned(),
                jaeger.with("protocols", protocols),
            ));
        }

        if !is_disabled_host_port(&transport.zipkin_host_port) {
            let zipkin = self.default_config(ComponentKind::Receiver, ZIPKIN_RECEIVER)?;
            receivers.push((
                ZIPKIN_RECEIVER.to_owned(),
                zipkin.with("endpoint", transport.zipkin_host_port.as_str()),
            ));
        }
        Ok(receivers)
    }

    fn agent_receivers(&self, transport: &TransportConfig) -> Result<Vec<(String, Value)>> {
        let mut protocols = Value::mapping();
        add_protocol(&mut protocols, "thrift_compact", &transport.thrift_compact_host_port);
        add_protocol(&mut protocols, "thrift_binary", &transport.thrift_binary_host_port);
        if protocols.is_empty() {
            return Ok(Vec::new());
        }
        let jaeger = self.default_config(ComponentKind::Receiver, JAEGER_RECEIVER)?;
        Ok(vec![(
            JAEGER_RECEIVER.to_owned(),
            jaeger.with("protocols", protocols),
        )])
    }

    fn upstream_exporter(&self, transport: &TransportConfig) -> Result<Value> {
        let endpoint = transport
            .reporter_host_ports
            .iter()
            .map(|hp| hp.trim())
            .find(|hp| !hp.is_empty())
            .ok_or_else(|| {
                ConfigError::InvalidTopology(
                    "agent requires at least one upstream collector host:port".to_owned(),
                )
            })?;
        Ok(self
            .default_config(ComponentKind::Exporter, JAEGER_EXPORTER)?
            .with("endpoint", endpoint))
    }

    /// The tagging processor, only when labels are configured.
    fn resource_processor(&self) -> Result<Option<Value>> {
        let cfg = self.default_config(ComponentKind::Processor, RESOURCE_PROCESSOR)?;
        let has_labels = cfg.get("labels").is_some_and(|labels| !labels.is_empty());
        Ok(has_labels.then_some(cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::components;

    fn exporters(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_owned()).collect()
    }

    fn collector_transport() -> TransportConfig {
        TransportConfig::from_options(&Options::default())
    }

    #[test]
    fn test_collector_defaults() {
        let reg = components(&Options::default()).unwrap();
        let cfg = Assembler::new(&reg)
            .assemble(&collector_transport(), &exporters(&["cassandra"]), Role::Collector)
            .unwrap();

        let pipeline = cfg.traces_pipeline().unwrap();
        assert_eq!(pipeline.receivers, vec!["jaeger"]);
        assert_eq!(pipeline.processors, vec!["batch"]);
        assert_eq!(pipeline.exporters, vec!["cassandra"]);
        assert_eq!(cfg.service.extensions, vec!["health_check"]);
        assert_eq!(cfg.extensions.len(), 1);

        let jaeger = &cfg.receivers["jaeger"];
        assert_eq!(
            jaeger.get_path(&["protocols", "grpc", "endpoint"]).and_then(Value::as_str),
            Some(":14250")
        );
        assert_eq!(
            jaeger.get_path(&["protocols", "thrift_http", "endpoint"]).and_then(Value::as_str),
            Some(":14268")
        );
    }

    #[test]
    fn test_grpc_max_message_size_from_options() {
        let mut options = Options::default();
        options.collector.max_receive_message_length = 1024;
        let reg = components(&options).unwrap();
        let cfg = Assembler::new(&reg)
            .assemble(
                &TransportConfig::from_options(&options),
                &exporters(&["cassandra"]),
                Role::Collector,
            )
            .unwrap();
        let grpc = cfg.receivers["jaeger"].get_path(&["protocols", "grpc"]).unwrap();
        assert_eq!(grpc.get("max_recv_msg_size").and_then(Value::as_i64), Some(1024));

        let mut transport = TransportConfig::from_options(&options);
        transport.max_receive_message_length = 0;
        let cfg = Assembler::new(&reg)
            .assemble(&transport, &exporters(&["cassandra"]), Role::Collector)
            .unwrap();
        assert!(cfg.receivers["jaeger"]
            .get_path(&["protocols", "grpc", "max_recv_msg_size"])
            .is_none());
    }

    #[test]
    fn test_zipkin_and_resource_when_configured() {
        let mut options = Options::default();
        options.collector.tags = "foo=bar".to_owned();
        options.collector.zipkin_host_port = ":9411".to_owned();
        let reg = components(&options).unwrap();
        let cfg = Assembler::new(&reg)
            .assemble(
                &TransportConfig::from_options(&options),
                &exporters(&["cassandra"]),
                Role::Collector,
            )
            .unwrap();

        let pipeline = cfg.traces_pipeline().unwrap();
        assert_eq!(pipeline.receivers, vec!["jaeger", "zipkin"]);
        assert_eq!(pipeline.processors, vec!["resource", "batch"]);
        assert_eq!(
            cfg.receivers["zipkin"].get("endpoint").and_then(Value::as_str),
            Some(":9411")
        );
    }

    #[test]
    fn test_disabled_zipkin_is_omitted_entirely() {
        let reg = components(&Options::default()).unwrap();
        let mut transport = collector_transport();
        transport.zipkin_host_port = ":0".to_owned();
        let cfg = Assembler::new(&reg)
            .assemble(&transport, &exporters(&["cassandra"]), Role::Collector)
            .unwrap();
        assert!(!cfg.receivers.contains_key("zipkin"));
    }

    #[test]
    fn test_multiple_exporters_fan_out_on_one_pipeline() {
        let reg = components(&Options::default()).unwrap();
        let cfg = Assembler::new(&reg)
            .assemble(
                &collector_transport(),
                &exporters(&["grpc-plugin", "cassandra", "elasticsearch"]),
                Role::Collector,
            )
            .unwrap();
        assert_eq!(cfg.service.pipelines.len(), 1);
        assert_eq!(
            cfg.traces_pipeline().unwrap().exporters,
            vec!["cassandra", "elasticsearch", "grpc-plugin"]
        );
        assert_eq!(cfg.exporters.len(), 3);
    }

    #[test]
    fn test_empty_exporters_is_invalid_for_storage_roles() {
        let reg = components(&Options::default()).unwrap();
        let assembler = Assembler::new(&reg);
        for role in [Role::Collector, Role::Ingester] {
            let err = assembler
                .assemble(&collector_transport(), &BTreeSet::new(), role)
                .unwrap_err();
            assert!(matches!(err, ConfigError::InvalidTopology(_)), "{role}");
        }
    }

    #[test]
    fn test_no_enabled_listeners_is_invalid() {
        let reg = components(&Options::default()).unwrap();
        let transport = TransportConfig {
            grpc_host_port: ":0".to_owned(),
            ..TransportConfig::default()
        };
        let err = Assembler::new(&reg)
            .assemble(&transport, &exporters(&["cassandra"]), Role::Collector)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology(_)));
    }

    #[test]
    fn test_agent_forwards_upstream() {
        let mut options = Options::default();
        options.agent.reporter_host_ports = vec!["coll:33".to_owned()];
        let reg = components(&options).unwrap();
        let cfg = Assembler::new(&reg)
            .assemble(
                &TransportConfig::from_options(&options),
                &exporters(&["cassandra"]),
                Role::Agent,
            )
            .unwrap();

        let pipeline = cfg.traces_pipeline().unwrap();
        assert_eq!(pipeline.receivers, vec!["jaeger"]);
        assert!(pipeline.processors.is_empty());
        assert_eq!(pipeline.exporters, vec!["jaeger"]);
        assert_eq!(
            cfg.exporters["jaeger"].get("endpoint").and_then(Value::as_str),
            Some("coll:33")
        );
        let jaeger = &cfg.receivers["jaeger"];
        assert!(jaeger.get_path(&["protocols", "thrift_compact"]).is_some());
        assert!(jaeger.get_path(&["protocols", "thrift_binary"]).is_some());
        assert!(jaeger.get_path(&["protocols", "grpc"]).is_none());
    }

    #[test]
    fn test_agent_without_upstream_fails() {
        let reg = components(&Options::default()).unwrap();
        let err = Assembler::new(&reg)
            .assemble(&collector_transport(), &BTreeSet::new(), Role::Agent)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopology(_)));
    }

    #[test]
    fn test_ingester_has_no_batching() {
        let reg = components(&Options::default()).unwrap();
        let cfg = Assembler::new(&reg)
            .assemble(
                &collector_transport(),
                &exporters(&["elasticsearch", "cassandra"]),
                Role::Ingester,
            )
            .unwrap();
        let pipeline = cfg.traces_pipeline().unwrap();
        assert_eq!(pipeline.receivers, vec!["kafka"]);
        assert!(pipeline.processors.is_empty());
        assert_eq!(pipeline.exporters, vec!["cassandra", "elasticsearch"]);
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Agent".parse::<Role>().unwrap(), Role::Agent);
        assert!("query".parse::<Role>().is_err());
        assert_eq!(Role::Ingester.to_string(), "ingester");
    }
}
