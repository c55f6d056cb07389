//! Engine configuration.
//!
//! Everything here deserializes from TOML. Missing sections fall back to
//! their defaults, so an empty document is a valid configuration.

use eddy_core::{Error, Field, Result};
use eddy_dataset::AggregateColumn;
use eddy_window::WindowPolicy;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Engine name, used in log output.
    pub name: String,
    /// Logical time the engine clock starts at, in milliseconds.
    pub initial_time: i64,
    /// Default for statements that do not set their own empty-boundary flag.
    pub deliver_empty_boundaries: bool,
    pub logging: LoggingConfig,
    /// Event types registered at startup.
    pub event_types: Vec<EventTypeConfig>,
    /// Datasets created at startup, after the event types.
    pub datasets: Vec<DatasetConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "eddy".to_string(),
            initial_time: 0,
            deliver_empty_boundaries: false,
            logging: LoggingConfig::default(),
            event_types: Vec::new(),
            datasets: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| Error::config(format!("invalid engine config: {}", e)))
    }

    /// Reads and parses a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }
}

/// An event type declared in configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct EventTypeConfig {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<Field>,
}

/// A dataset declared in configuration.
///
/// A dataset with aggregate columns is created as an aggregation table and
/// ignores `retention`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    pub event_type: String,
    #[serde(default)]
    pub retention: WindowPolicy,
    #[serde(default)]
    pub aggregate: Vec<AggregateColumn>,
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive, e.g. `info`.
    pub level: String,
    /// Per-module level overrides, e.g. `eddy_join = "trace"`.
    pub modules: BTreeMap<String, String>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            modules: BTreeMap::new(),
            format: LogFormat::Plain,
        }
    }
}

impl LoggingConfig {
    /// Renders the filter directives, e.g. `info,eddy_join=trace`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (module, level) in &self.modules {
            directives.push_str(&format!(",{}={}", module, level));
        }
        directives
    }
}
