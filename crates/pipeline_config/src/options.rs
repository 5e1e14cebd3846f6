//! Start-up options for each role.
//!
//! These are the values the binary collects from flags and the environment.
//! They feed the built-in factory defaults and the transport section of the
//! assembled pipeline.

use crate::error::{ConfigError, Result};
use indexmap::IndexMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_NUM_WORKERS: usize = 50;
pub const DEFAULT_QUEUE_SIZE: usize = 2000;
pub const DEFAULT_GRPC_MAX_RECEIVE_MESSAGE_LENGTH: usize = 4 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Collector role options.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorOptions {
    /// Workers pulling items from the queue
    pub num_workers: usize,
    /// Fixed queue capacity (items), used when no memory budget is set
    pub queue_size: usize,
    /// Memory budget for the dynamic queue in MiB; 0 selects the fixed queue
    pub queue_size_memory_mib: u64,
    pub grpc_host_port: String,
    pub http_host_port: String,
    /// Zipkin listener; empty disables the receiver
    pub zipkin_host_port: String,
    /// `key=value` tags added to every span, `${ENV:default}` values expanded
    pub tags: String,
    pub max_receive_message_length: usize,
    /// Zero disables connection ageing
    pub max_connection_age: Duration,
    pub max_connection_age_grace: Duration,
    /// Upper bound on the queue drain at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for CollectorOptions {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            queue_size_memory_mib: 0,
            grpc_host_port: ":14250".to_owned(),
            http_host_port: ":14268".to_owned(),
            zipkin_host_port: String::new(),
            tags: String::new(),
            max_receive_message_length: DEFAULT_GRPC_MAX_RECEIVE_MESSAGE_LENGTH,
            max_connection_age: Duration::ZERO,
            max_connection_age_grace: Duration::ZERO,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl CollectorOptions {
    /// Memory budget in bytes, or `None` for the fixed-size queue.
    ///
    /// Saturates at `u64::MAX` bytes.
    pub fn queue_budget_bytes(&self) -> Option<u64> {
        (self.queue_size_memory_mib > 0)
            .then(|| self.queue_size_memory_mib.saturating_mul(1024 * 1024))
    }

    pub fn parsed_tags(&self) -> Result<IndexMap<String, String>> {
        parse_tags(&self.tags)
    }
}

/// Agent role options.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOptions {
    pub thrift_compact_host_port: String,
    pub thrift_binary_host_port: String,
    /// Upstream collectors, first one wins
    pub reporter_host_ports: Vec<String>,
    pub sampling_strategies_file: Option<PathBuf>,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            thrift_compact_host_port: ":6831".to_owned(),
            thrift_binary_host_port: ":6832".to_owned(),
            reporter_host_ports: Vec::new(),
            sampling_strategies_file: None,
        }
    }
}

/// Ingester role options.
#[derive(Debug, Clone, PartialEq)]
pub struct IngesterOptions {
    pub kafka_brokers: Vec<String>,
    pub kafka_topic: String,
    pub kafka_encoding: String,
}

impl Default for IngesterOptions {
    fn default() -> Self {
        Self {
            kafka_brokers: vec!["127.0.0.1:9092".to_owned()],
            kafka_topic: "jaeger-spans".to_owned(),
            kafka_encoding: "protobuf".to_owned(),
        }
    }
}

/// All role options together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    pub collector: CollectorOptions,
    pub agent: AgentOptions,
    pub ingester: IngesterOptions,
}

/// Normalises a bare port (`"14250"`) into host-port form (`":14250"`).
pub fn normalize_host_port(host_port: &str) -> String {
    let trimmed = host_port.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!(":{trimmed}")
    } else {
        trimmed.to_owned()
    }
}

/// An empty host port or port 0 means the listener is off.
pub fn is_disabled_host_port(host_port: &str) -> bool {
    let normalized = normalize_host_port(host_port);
    normalized.is_empty() || normalized.rsplit(':').next() == Some("0")
}

/// Splits a comma-separated host-port list, dropping blanks.
pub fn parse_host_ports(list: &str) -> Vec<String> {
    list.split(',')
        .map(normalize_host_port)
        .filter(|hp| !hp.is_empty())
        .collect()
}

/// Parses `k1=v1,k2=${ENV:default}` using the process environment.
pub fn parse_tags(tags: &str) -> Result<IndexMap<String, String>> {
    parse_tags_with(tags, |name| std::env::var(name).ok())
}

/// [`parse_tags`] with an explicit environment lookup.
pub fn parse_tags_with<F>(tags: &str, lookup: F) -> Result<IndexMap<String, String>>
where
    F: Fn(&str) -> Option<String>,
{
    let mut parsed = IndexMap::new();
    for pair in tags.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::InvalidTag(pair.to_owned()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidTag(pair.to_owned()));
        }
        parsed.insert(key.to_owned(), expand_env(value.trim(), &lookup));
    }
    Ok(parsed)
}

fn expand_env<F>(value: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) else {
        return value.to_owned();
    };
    let (name, default) = inner.split_once(':').unwrap_or((inner, ""));
    match lookup(name) {
        Some(v) if !v.is_empty() => v,
        _ => default.to_owned(),
    }
}
