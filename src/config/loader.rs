//! Configuration loader: environment-aware YAML file discovery and merging.
//!
//! `outreach-core.yaml` is the base; `outreach-core.{environment}.yaml`, when
//! present, is deep-merged over it (mappings merge recursively, scalars and
//! sequences replace). The environment comes from `OUTREACH_ENV`, then
//! `APP_ENV`, defaulting to `development`.

use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::CoreConfig;
use crate::error::CoreError;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from the default `config/` directory with auto-detected
    /// environment.
    pub fn load() -> Result<CoreConfig, CoreError> {
        Self::load_from_directory(Path::new("config"), &Self::detect_environment())
    }

    /// Load from a specific directory with an explicit environment. Useful
    /// for tests that must not touch process environment variables.
    pub fn load_from_directory(dir: &Path, environment: &str) -> Result<CoreConfig, CoreError> {
        let base_path = dir.join("outreach-core.yaml");
        let mut merged = Self::read_yaml(&base_path)?;

        let overlay_path = dir.join(format!("outreach-core.{environment}.yaml"));
        if overlay_path.exists() {
            debug!(overlay = %overlay_path.display(), "applying environment overlay");
            let overlay = Self::read_yaml(&overlay_path)?;
            merged = Self::deep_merge(merged, overlay);
        }

        let config: CoreConfig = serde_yaml::from_value(merged)
            .map_err(|e| CoreError::Configuration(format!("invalid configuration: {e}")))?;
        config.validate()?;

        debug!(environment, directory = %dir.display(), "configuration loaded");
        Ok(config)
    }

    pub fn detect_environment() -> String {
        env::var("OUTREACH_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn read_yaml(path: &PathBuf) -> Result<YamlValue, CoreError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CoreError::Configuration(format!("invalid YAML {}: {e}", path.display())))
    }

    /// Mappings merge key-by-key; anything else in the overlay wins.
    fn deep_merge(base: YamlValue, overlay: YamlValue) -> YamlValue {
        match (base, overlay) {
            (YamlValue::Mapping(mut base_map), YamlValue::Mapping(overlay_map)) => {
                for (key, overlay_value) in overlay_map {
                    let merged = match base_map.remove(&key) {
                        Some(base_value) => Self::deep_merge(base_value, overlay_value),
                        None => overlay_value,
                    };
                    base_map.insert(key, merged);
                }
                YamlValue::Mapping(base_map)
            }
            (_, overlay) => overlay,
        }
    }
}
