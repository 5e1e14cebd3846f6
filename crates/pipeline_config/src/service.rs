//! The assembled service configuration.
//!
//! Same schema as the user override document: component sections keyed by
//! `type[/instance]` names plus a `service` section wiring them into pipelines.

use crate::error::{ConfigError, Result};
use crate::registry::{ComponentKind, Registry};
use crate::value::{Mapping, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of the single trace pipeline every role produces.
pub const TRACES_PIPELINE: &str = "traces";

/// Kind of telemetry a pipeline carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    #[default]
    Traces,
    Metrics,
    Logs,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataKind::Traces => "traces",
            DataKind::Metrics => "metrics",
            DataKind::Logs => "logs",
        };
        f.write_str(s)
    }
}

/// One receiver → processors → exporters chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default, rename = "data_type")]
    pub data_kind: DataKind,
    #[serde(default)]
    pub receivers: Vec<String>,
    /// Applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processors: Vec<String>,
    /// Fan-out targets, kept sorted
    #[serde(default)]
    pub exporters: Vec<String>,
}

impl PipelineConfig {
    pub fn new(data_kind: DataKind) -> Self {
        Self {
            data_kind,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub pipelines: IndexMap<String, PipelineConfig>,
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub extensions: Mapping,
    #[serde(default)]
    pub receivers: Mapping,
    #[serde(default)]
    pub processors: Mapping,
    #[serde(default)]
    pub exporters: Mapping,
    #[serde(default)]
    pub service: Service,
}

impl ServiceConfig {
    /// Component section for a capability.
    pub fn section(&self, kind: ComponentKind) -> &Mapping {
        match kind {
            ComponentKind::Receiver => &self.receivers,
            ComponentKind::Processor => &self.processors,
            ComponentKind::Exporter => &self.exporters,
            ComponentKind::Extension => &self.extensions,
        }
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.service.pipelines.get(name)
    }

    pub fn traces_pipeline(&self) -> Option<&PipelineConfig> {
        self.pipeline(TRACES_PIPELINE)
    }

    /// Configuration of a component referenced by a pipeline.
    pub fn component(&self, kind: ComponentKind, name: &str) -> Option<&Value> {
        self.section(kind).get(name)
    }

    /// Checks the pipeline graph against itself and the registry.
    pub fn validate(&self, registry: &Registry) -> Result<()> {
        for ext in &self.service.extensions {
            self.check_reference(registry, ComponentKind::Extension, ext)?;
        }
        if self.service.pipelines.is_empty() {
            return Err(ConfigError::InvalidTopology("no pipelines defined".to_owned()));
        }
        for (name, pipeline) in &self.service.pipelines {
            if pipeline.receivers.is_empty() {
                return Err(ConfigError::InvalidTopology(format!(
                    "pipeline {name:?} has no receivers"
                )));
            }
            if pipeline.exporters.is_empty() {
                return Err(ConfigError::InvalidTopology(format!(
                    "pipeline {name:?} has no exporters"
                )));
            }
            let lists = [
                (ComponentKind::Receiver, &pipeline.receivers),
                (ComponentKind::Processor, &pipeline.processors),
                (ComponentKind::Exporter, &pipeline.exporters),
            ];
            for (kind, names) in lists {
                let mut seen = HashSet::new();
                for component in names {
                    if !seen.insert(component.as_str()) {
                        return Err(ConfigError::InvalidTopology(format!(
                            "pipeline {name:?} references {kind} {component:?} more than once"
                        )));
                    }
                    self.check_reference(registry, kind, component)?;
                }
            }
        }
        Ok(())
    }

    fn check_reference(&self, registry: &Registry, kind: ComponentKind, name: &str) -> Result<()> {
        if self.section(kind).contains_key(name) && registry.contains(kind, name) {
            Ok(())
        } else {
            Err(ConfigError::UnknownComponent {
                kind,
                name: name.to_owned(),
            })
        }
    }

    /// Converts to the generic value tree.
    pub fn to_value(&self) -> Result<Value> {
        serde_yaml::to_value(self)
            .map(Value::from)
            .map_err(|e| ConfigError::InvalidDocument(e.to_string()))
    }

    /// Decodes from the generic value tree.
    pub fn from_value(value: Value) -> Result<Self> {
        serde_yaml::from_value(serde_yaml::Value::from(value))
            .map_err(|e| ConfigError::InvalidDocument(e.to_string()))
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::InvalidDocument(e.to_string()))
    }
}
