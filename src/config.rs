//! Viewer configuration.
//!
//! Loaded with figment from a TOML file, then overridden by environment
//! variables prefixed `GDA_` (nested keys split on `__`, e.g.
//! `GDA_LOG_LEVEL=debug`, `GDA_SIMULATION__NOISE=0.5`).
//!
//! ```toml
//! log_level = "info"
//! log_format = "compact"
//! state_format = "json"
//!
//! [[controllers]]
//! service_name = "pco"
//! pv_prefix = "BL13I-EA-DET-01:"
//! array_port_input = "pco1.cam"
//! terminal = { type = "simple_acquire", readout_time = 0.05 }
//!
//! [[controllers.collection]]
//! type = "stop_before_prepare"
//!
//! [[controllers.collection]]
//! type = "trigger_mode"
//! trigger_mode = 1
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use gda_adviewer::persist::{self, StateFormat};
use gda_adviewer::ControllerConfig;
use gda_areadetector::SimDetectorConfig;
use gda_core::{GdaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::logging::{self, OutputFormat};

fn default_log_level() -> String {
    "info".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// trace, debug, info, warn or error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log line format.
    #[serde(default)]
    pub log_format: OutputFormat,
    /// Directory for saved reference stores.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Format of saved reference stores.
    #[serde(default)]
    pub state_format: StateFormat,
    /// Simulated camera used by the CLI.
    #[serde(default)]
    pub simulation: SimDetectorConfig,
    /// Detectors.
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
            state_dir: None,
            state_format: StateFormat::default(),
            simulation: SimDetectorConfig::default(),
            controllers: Vec::new(),
        }
    }
}

impl ViewerConfig {
    /// Figment for `path` plus `GDA_` environment overrides.
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GDA_").split("__"))
    }

    /// Loads and validates the configuration at `path`.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that can never work.
    pub fn validate(&self) -> Result<()> {
        logging::parse_log_level(&self.log_level)?;

        let mut seen = HashSet::new();
        for controller in &self.controllers {
            controller.validate()?;
            if !seen.insert(controller.service_name.as_str()) {
                return Err(GdaError::Configuration(format!(
                    "Duplicate controller service: {}",
                    controller.service_name
                )));
            }
        }

        if self.simulation.width == 0 || self.simulation.height == 0 {
            return Err(GdaError::Configuration(
                "simulation width and height must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Directory for saved stores, falling back to the per-user data dir.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(persist::default_state_dir)
    }

    /// Entry for `service`.
    pub fn controller(&self, service: &str) -> Option<&ControllerConfig> {
        self.controllers.iter().find(|c| c.service_name == service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gda_areadetector::{DecoratorSpec, ImageMode, TerminalSpec};
    use serial_test::serial;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
        log_level = "debug"
        log_format = "json"
        state_format = "json"

        [simulation]
        width = 16
        height = 8

        [[controllers]]
        service_name = "pco"
        pv_prefix = "BL13I-EA-DET-01:"
        terminal = { type = "simple_acquire", readout_time = 0.05 }

        [[controllers.collection]]
        type = "image_mode"
        image_mode = "multiple"

        [[controllers.collection]]
        type = "unsynchronised_external_shutter"
    "#;

    fn write_config(dir: &TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("adviewer.toml");
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_load_sample() {
        let dir = TempDir::new().unwrap();
        let config = ViewerConfig::load_from(write_config(&dir, SAMPLE)).unwrap();

        assert_eq!(config.log_format, OutputFormat::Json);
        assert_eq!(config.simulation.width, 16);
        let pco = config.controller("pco").unwrap();
        assert_eq!(
            pco.terminal,
            Some(TerminalSpec::SimpleAcquire { readout_time: 0.05 })
        );
        assert_eq!(
            pco.collection,
            vec![
                DecoratorSpec::ImageMode {
                    image_mode: ImageMode::Multiple
                },
                DecoratorSpec::UnsynchronisedExternalShutter {
                    collection_extension_s: 5.0
                },
            ]
        );
    }

    #[test]
    #[serial]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ViewerConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ViewerConfig::default());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        std::env::set_var("GDA_LOG_LEVEL", "warn");
        std::env::set_var("GDA_SIMULATION__NOISE", "0.5");
        let result = ViewerConfig::load_from(&path);
        std::env::remove_var("GDA_LOG_LEVEL");
        std::env::remove_var("GDA_SIMULATION__NOISE");

        let config = result.unwrap();
        assert_eq!(config.log_level, "warn");
        assert!((config.simulation.noise - 0.5).abs() < 1e-12);
    }

    #[test]
    #[serial]
    fn test_invalid_log_level_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "log_level = \"loud\"\n");
        assert!(matches!(
            ViewerConfig::load_from(path),
            Err(GdaError::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_services_rejected() {
        let config = ViewerConfig {
            controllers: vec![
                ControllerConfig::new("pco", "A:"),
                ControllerConfig::new("pco", "B:"),
            ],
            ..ViewerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "controllers = 3\n");
        assert!(matches!(ViewerConfig::load_from(path), Err(GdaError::Config(_))));
    }

    #[test]
    fn test_state_dir_override() {
        let config = ViewerConfig {
            state_dir: Some(PathBuf::from("/tmp/gda-state")),
            ..ViewerConfig::default()
        };
        assert_eq!(config.state_dir(), PathBuf::from("/tmp/gda-state"));
    }
}
