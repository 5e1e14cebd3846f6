//! Error types for configuration assembly.
//!
//! Every variant here is a start-up error: the process must abort rather
//! than run with a partial pipeline.

use crate::registry::ComponentKind;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while resolving, assembling, merging or loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A storage-type token has no registered exporter.
    #[error("unknown storage type: {0}")]
    UnknownBackend(String),

    /// The assembled (or merged) pipeline graph cannot run.
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// The override document tried to introduce a pipeline the default lacks.
    #[error("ambiguous merge: override defines pipeline {0:?} which is not present in the default configuration")]
    AmbiguousMerge(String),

    /// A pipeline or service section references a component that is not defined or not registered.
    #[error("unknown {kind} {name:?}")]
    UnknownComponent { kind: ComponentKind, name: String },

    /// The same type was registered twice under one kind.
    #[error("duplicate {kind} factory {name:?}")]
    DuplicateComponent { kind: ComponentKind, name: String },

    /// The override document does not have the shape of a service configuration.
    #[error("invalid configuration document: {0}")]
    InvalidDocument(String),

    /// A `key=value` tag could not be parsed.
    #[error("invalid tag {0:?}: expected key=value")]
    InvalidTag(String),

    /// The override file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The override file is not valid YAML.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ConfigError {
    /// Returns `true` for errors caused by the assembled graph itself rather than by I/O.
    pub fn is_topology_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownBackend(_)
                | Self::InvalidTopology(_)
                | Self::AmbiguousMerge(_)
                | Self::UnknownComponent { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
