//! Overlaying a user document onto the assembled default.
//!
//! Field-level rules come from [`merge_values`](crate::value::merge_values).
//! On top of those, an override may only refine pipelines the default
//! already has; naming a new pipeline is an [`AmbiguousMerge`] error.
//!
//! Sequences are atomic, including pipeline processor lists: an override
//! of `processors` must name every processor it wants to keep.
//!
//! [`AmbiguousMerge`]: crate::ConfigError::AmbiguousMerge

use crate::error::{ConfigError, Result};
use crate::service::ServiceConfig;
use crate::value::{merge_values, Value};
use tracing::warn;

impl ServiceConfig {
    /// Returns a new configuration with `overlay` merged in.
    ///
    /// `self` is left untouched. A null or empty overlay yields an equal copy.
    pub fn merge(&self, overlay: Value) -> Result<ServiceConfig> {
        match &overlay {
            Value::Mapping(m) if m.is_empty() => return Ok(self.clone()),
            Value::Mapping(_) => {}
            v if v.is_null() => return Ok(self.clone()),
            _ => {
                return Err(ConfigError::InvalidDocument(
                    "override document must be a mapping".to_owned(),
                ))
            }
        }

        self.check_pipelines(&overlay)?;
        self.warn_dropped_processors(&overlay);

        let merged = merge_values(self.to_value()?, overlay);
        ServiceConfig::from_value(merged)
    }

    fn check_pipelines(&self, overlay: &Value) -> Result<()> {
        let Some(pipelines) = overlay.get_path(&["service", "pipelines"]) else {
            return Ok(());
        };
        if pipelines.is_null() {
            return Ok(());
        }
        let pipelines = pipelines.as_mapping().ok_or_else(|| {
            ConfigError::InvalidDocument("service.pipelines must be a mapping".to_owned())
        })?;
        for name in pipelines.keys() {
            if !self.service.pipelines.contains_key(name) {
                return Err(ConfigError::AmbiguousMerge(name.clone()));
            }
        }
        Ok(())
    }

    fn warn_dropped_processors(&self, overlay: &Value) {
        let Some(pipelines) = overlay
            .get_path(&["service", "pipelines"])
            .and_then(Value::as_mapping)
        else {
            return;
        };
        for (name, pipeline) in pipelines {
            let Some(replacement) = pipeline.get("processors").and_then(Value::as_sequence) else {
                continue;
            };
            let Some(base) = self.service.pipelines.get(name) else {
                continue;
            };
            for processor in &base.processors {
                let kept = replacement
                    .iter()
                    .any(|p| p.as_str() == Some(processor.as_str()));
                if !kept {
                    warn!(
                        pipeline = %name,
                        processor = %processor,
                        "override replaces the processor list and drops a default processor"
                    );
                }
            }
        }
    }
}
