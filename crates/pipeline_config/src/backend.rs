//! Storage backend resolution.
//!
//! Maps the storage-type selector (`"cassandra,elasticsearch"`) onto the set
//! of exporter types that will be attached to the trace pipeline.

use crate::components::JAEGER_EXPORTER;
use crate::error::{ConfigError, Result};
use crate::registry::{ComponentKind, Registry};
use std::collections::BTreeSet;

/// Separator between storage-type tokens.
pub const FIELD_SEPARATOR: char = ',';

/// Exporters that forward rather than write and so are never storage types.
const FORWARDING_EXPORTERS: &[&str] = &[JAEGER_EXPORTER];

/// Resolves storage-type tokens against the exporter factories of a registry.
#[derive(Debug, Clone, Copy)]
pub struct BackendResolver<'a> {
    registry: &'a Registry,
}

impl<'a> BackendResolver<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Splits and resolves a selector string.
    ///
    /// Duplicates collapse; the returned set is sorted. An empty selector is a
    /// single empty token and therefore fails like any unknown type.
    pub fn resolve(&self, storage_types: &str) -> Result<BTreeSet<String>> {
        self.resolve_tokens(storage_types.split(FIELD_SEPARATOR))
    }

    /// Resolves already-split tokens.
    pub fn resolve_tokens<I, S>(&self, tokens: I) -> Result<BTreeSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exporters = BTreeSet::new();
        for token in tokens {
            let token = token.as_ref().trim();
            // Instance names (`type/name`) are not storage types.
            if token.contains('/')
                || FORWARDING_EXPORTERS.contains(&token)
                || !self.registry.contains(ComponentKind::Exporter, token)
            {
                return Err(ConfigError::UnknownBackend(token.to_owned()));
            }
            exporters.insert(token.to_owned());
        }
        if exporters.is_empty() {
            return Err(ConfigError::UnknownBackend(String::new()));
        }
        Ok(exporters)
    }
}

/// Convenience wrapper around [`BackendResolver::resolve`].
pub fn resolve_backends(registry: &Registry, storage_types: &str) -> Result<BTreeSet<String>> {
    BackendResolver::new(registry).resolve(storage_types)
}
