//! Remote sampling-strategy source resolution for receivers.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where a receiver serves sampling strategies from.
///
/// Both sources may be set; the receiver picks precedence when it reads them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingSourceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_endpoint: Option<String>,
}

impl SamplingSourceConfig {
    /// The `remote_sampling` section of a receiver configuration.
    pub fn to_value(&self) -> Value {
        let mut section = Value::mapping();
        if let Some(file) = &self.strategy_file {
            section.insert("strategy_file", file.display().to_string());
        }
        if let Some(endpoint) = &self.fetch_endpoint {
            section.insert("fetch_endpoint", endpoint.as_str());
        }
        section
    }
}

/// Resolves the sampling source from a local strategy file and upstream collectors.
///
/// Returns `None` when neither is available, which disables strategy serving.
pub fn resolve_sampling_source(
    local_file: Option<&Path>,
    upstream_host_ports: &[String],
) -> Option<SamplingSourceConfig> {
    let strategy_file = local_file
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf);
    let fetch_endpoint = upstream_host_ports
        .iter()
        .map(|hp| hp.trim())
        .find(|hp| !hp.is_empty())
        .map(str::to_owned);

    if strategy_file.is_none() && fetch_endpoint.is_none() {
        return None;
    }
    Some(SamplingSourceConfig {
        strategy_file,
        fetch_endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nothing_configured_disables_sampling() {
        assert_eq!(resolve_sampling_source(None, &[]), None);
        assert_eq!(resolve_sampling_source(Some(Path::new("")), &[]), None);
    }

    #[test]
    fn test_file_only() {
        let cfg = resolve_sampling_source(Some(Path::new("/etc/strategies.json")), &[]).unwrap();
        assert_eq!(cfg.strategy_file, Some(PathBuf::from("/etc/strategies.json")));
        assert_eq!(cfg.fetch_endpoint, None);
    }

    #[test]
    fn test_first_upstream_wins() {
        let upstream = vec!["coll:33".to_owned(), "coll:44".to_owned()];
        let cfg = resolve_sampling_source(None, &upstream).unwrap();
        assert_eq!(cfg.fetch_endpoint.as_deref(), Some("coll:33"));
    }

    #[test]
    fn test_file_and_upstream_both_kept() {
        let upstream = vec!["coll:33".to_owned()];
        let cfg = resolve_sampling_source(Some(Path::new("s.json")), &upstream).unwrap();
        assert!(cfg.strategy_file.is_some());
        assert_eq!(cfg.fetch_endpoint.as_deref(), Some("coll:33"));

        let section = cfg.to_value();
        assert_eq!(section.get("strategy_file").and_then(Value::as_str), Some("s.json"));
        assert_eq!(section.get("fetch_endpoint").and_then(Value::as_str), Some("coll:33"));
    }
}
