//! Pipeline configuration for the span collector
//!
//! Turns a storage-type selector and a handful of transport options into a
//! validated receiver → processor → exporter graph, and overlays an optional
//! user document onto it.
//!
//! # Start-up sequence
//!
//! 1. [`components`] builds the immutable [`Registry`] of factories, folding
//!    start-up [`Options`] into factory defaults.
//! 2. [`BackendResolver`] maps `"cassandra,elasticsearch"` to exporter types.
//! 3. [`Assembler`] builds the default [`ServiceConfig`] for a [`Role`].
//! 4. [`ServiceConfig::merge`] overlays the user document.
//!
//! [`build_service_config`] runs all four. Every step is single-threaded and
//! runs before any runtime component starts.
//!
//! # Example
//!
//! ```
//! use pipeline_config::{build_service_config, components, Options, Role};
//!
//! let options = Options::default();
//! let registry = components(&options).unwrap();
//! let config = build_service_config(
//!     &registry,
//!     &options,
//!     Role::Collector,
//!     "cassandra,elasticsearch",
//!     None,
//! )
//! .unwrap();
//!
//! let traces = config.traces_pipeline().unwrap();
//! assert_eq!(traces.exporters, vec!["cassandra", "elasticsearch"]);
//! ```

mod assembler;
mod backend;
pub mod components;
mod error;
mod loader;
mod merge;
pub mod options;
mod registry;
mod sampling;
mod service;
pub mod value;

pub use assembler::{Assembler, Role, TransportConfig};
pub use backend::{resolve_backends, BackendResolver, FIELD_SEPARATOR};
pub use components::components;
pub use error::{ConfigError, Result};
pub use loader::{
    build_service_config, load_override, parse_override, storage_type_from_env,
    DEFAULT_STORAGE_TYPE, SPAN_STORAGE_TYPE_ENV,
};
pub use options::{AgentOptions, CollectorOptions, IngesterOptions, Options};
pub use registry::{component_type, with_defaults, ComponentFactory, ComponentKind, Registry, RegistryBuilder};
pub use sampling::{resolve_sampling_source, SamplingSourceConfig};
pub use service::{DataKind, PipelineConfig, Service, ServiceConfig, TRACES_PIPELINE};
pub use value::{merge_values, Mapping, Scalar, Value};
