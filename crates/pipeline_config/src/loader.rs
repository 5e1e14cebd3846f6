//! Override document loading and the bootstrap sequence.

use crate::assembler::{Assembler, Role, TransportConfig};
use crate::backend::BackendResolver;
use crate::error::{ConfigError, Result};
use crate::options::Options;
use crate::registry::Registry;
use crate::service::ServiceConfig;
use crate::value::Value;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable holding the storage-type selector.
pub const SPAN_STORAGE_TYPE_ENV: &str = "SPAN_STORAGE_TYPE";
pub const DEFAULT_STORAGE_TYPE: &str = "cassandra";

/// Storage-type selector from the environment, falling back to the default.
pub fn storage_type_from_env() -> String {
    std::env::var(SPAN_STORAGE_TYPE_ENV)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_STORAGE_TYPE.to_owned())
}

/// Parses an override document from YAML text.
pub fn parse_override(content: &str) -> Result<Value> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::InvalidDocument(e.to_string()))
}

/// Reads and parses an override document.
pub fn load_override(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Runs resolution, assembly and the optional merge, returning the final configuration.
///
/// The storage selector is only consulted for roles that write storage.
pub fn build_service_config(
    registry: &Registry,
    options: &Options,
    role: Role,
    storage_types: &str,
    overlay: Option<Value>,
) -> Result<ServiceConfig> {
    let exporters = if role.writes_storage() {
        let resolved = BackendResolver::new(registry).resolve(storage_types)?;
        info!(%role, exporters = ?resolved, "resolved storage backends");
        resolved
    } else {
        BTreeSet::new()
    };

    let transport = TransportConfig::from_options(options);
    let default = Assembler::new(registry).assemble(&transport, &exporters, role)?;

    let Some(overlay) = overlay else {
        return Ok(default);
    };
    let merged = default.merge(overlay)?;
    merged.validate(registry)?;
    debug!(pipelines = ?merged.service.pipelines, "merged override configuration");
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::components;
    use std::io::Write;

    #[test]
    fn test_load_override_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exporters:\n  cassandra:\n    keyspace: prod").unwrap();
        let doc = load_override(file.path()).unwrap();
        assert_eq!(
            doc.get_path(&["exporters", "cassandra", "keyspace"]).and_then(Value::as_str),
            Some("prod")
        );
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_override(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "exporters: [unclosed").unwrap();
        let err = load_override(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse"));
    }

    #[test]
    fn test_build_with_override() {
        let options = Options::default();
        let reg = components(&options).unwrap();
        let overlay = parse_override("processors:\n  batch:\n    send_batch_size: 10").unwrap();
        let cfg =
            build_service_config(&reg, &options, Role::Collector, "memory", Some(overlay)).unwrap();
        assert_eq!(
            cfg.processors["batch"].get("send_batch_size"),
            Some(&Value::from(10_i64))
        );
        assert_eq!(cfg.traces_pipeline().unwrap().exporters, vec!["memory"]);
    }

    #[test]
    fn test_override_referencing_unknown_component_fails_validation() {
        let options = Options::default();
        let reg = components(&options).unwrap();
        let overlay =
            parse_override("service:\n  pipelines:\n    traces:\n      exporters: [floppy]").unwrap();
        let err = build_service_config(&reg, &options, Role::Collector, "cassandra", Some(overlay))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownComponent { .. }));
    }

    #[test]
    fn test_agent_ignores_storage_selector() {
        let mut options = Options::default();
        options.agent.reporter_host_ports = vec!["coll:14250".to_owned()];
        let reg = components(&options).unwrap();
        let cfg = build_service_config(&reg, &options, Role::Agent, "floppy", None).unwrap();
        assert_eq!(cfg.traces_pipeline().unwrap().exporters, vec!["jaeger"]);
    }
}
