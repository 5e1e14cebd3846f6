//! Component registry.
//!
//! An explicit, immutable set of component factories keyed by capability and
//! type name. It is built once at start-up and handed by reference to the
//! assembler and validator.

use crate::error::{ConfigError, Result};
use crate::value::{merge_values, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Capability tag of a component factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Receiver,
    Processor,
    Exporter,
    Extension,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentKind::Receiver => "receiver",
            ComponentKind::Processor => "processor",
            ComponentKind::Exporter => "exporter",
            ComponentKind::Extension => "extension",
        };
        f.write_str(s)
    }
}

/// Returns the type part of a `type[/instance]` component name.
pub fn component_type(name: &str) -> &str {
    name.split_once('/').map_or(name, |(ty, _)| ty)
}

/// Produces the default configuration of one component type.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentFactory {
    type_name: String,
    kind: ComponentKind,
    default_config: Value,
}

impl ComponentFactory {
    pub fn new(kind: ComponentKind, type_name: impl Into<String>, default_config: Value) -> Self {
        Self {
            type_name: type_name.into(),
            kind,
            default_config,
        }
    }

    pub fn receiver(type_name: impl Into<String>, default_config: Value) -> Self {
        Self::new(ComponentKind::Receiver, type_name, default_config)
    }

    pub fn processor(type_name: impl Into<String>, default_config: Value) -> Self {
        Self::new(ComponentKind::Processor, type_name, default_config)
    }

    pub fn exporter(type_name: impl Into<String>, default_config: Value) -> Self {
        Self::new(ComponentKind::Exporter, type_name, default_config)
    }

    pub fn extension(type_name: impl Into<String>, default_config: Value) -> Self {
        Self::new(ComponentKind::Extension, type_name, default_config)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Returns a fresh copy of the default configuration.
    pub fn create_default_config(&self) -> Value {
        self.default_config.clone()
    }
}

/// Decorates a factory so its default configuration carries `overrides`.
///
/// Composed at registration time; the resulting factory is an ordinary
/// factory and the registry never sees the wrapped one.
pub fn with_defaults(base: ComponentFactory, overrides: Value) -> ComponentFactory {
    ComponentFactory {
        default_config: merge_values(base.default_config, overrides),
        ..base
    }
}

/// Immutable set of registered factories.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    factories: BTreeMap<ComponentKind, BTreeMap<String, ComponentFactory>>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Looks up a factory by kind and type name (`type[/instance]` accepted).
    pub fn get(&self, kind: ComponentKind, name: &str) -> Option<&ComponentFactory> {
        self.factories
            .get(&kind)
            .and_then(|by_type| by_type.get(component_type(name)))
    }

    pub fn contains(&self, kind: ComponentKind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    /// Default configuration of a registered component.
    pub fn default_config(&self, kind: ComponentKind, name: &str) -> Result<Value> {
        self.get(kind, name)
            .map(ComponentFactory::create_default_config)
            .ok_or_else(|| ConfigError::UnknownComponent {
                kind,
                name: name.to_owned(),
            })
    }

    /// Registered type names of one kind, sorted.
    pub fn types(&self, kind: ComponentKind) -> impl Iterator<Item = &str> {
        self.factories
            .get(&kind)
            .into_iter()
            .flat_map(|by_type| by_type.keys().map(String::as_str))
    }
}

/// Collects factories; duplicate registrations fail [`build`](Self::build).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    factories: BTreeMap<ComponentKind, BTreeMap<String, ComponentFactory>>,
    duplicate: Option<(ComponentKind, String)>,
}

impl RegistryBuilder {
    pub fn register(mut self, factory: ComponentFactory) -> Self {
        let by_type = self.factories.entry(factory.kind).or_default();
        if by_type.contains_key(&factory.type_name) {
            if self.duplicate.is_none() {
                self.duplicate = Some((factory.kind, factory.type_name.clone()));
            }
            return self;
        }
        by_type.insert(factory.type_name.clone(), factory);
        self
    }

    pub fn build(self) -> Result<Registry> {
        if let Some((kind, name)) = self.duplicate {
            return Err(ConfigError::DuplicateComponent { kind, name });
        }
        Ok(Registry {
            factories: self.factories,
        })
    }
}
