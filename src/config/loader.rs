//! # Configuration Loader
//!
//! Loads a [`ConnectorConfig`] from a file (format picked from the extension)
//! layered with `PULSAR_CONNECTOR__*` environment overrides, e.g.
//! `PULSAR_CONNECTOR__CONNECTION__URL=pulsar://broker:6650`.

use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::ConnectorConfig;
use crate::error::Result;

pub const ENV_PREFIX: &str = "PULSAR_CONNECTOR";

const SENSITIVE_KEYS: &[&str] = &["jwt", "privateKey", "keyFile", "certFile", "caCert"];

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: ConnectorConfig,
    source: Option<PathBuf>,
}

impl ConfigManager {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading connector configuration");

        let built = Config::builder()
            .add_source(File::from(path))
            .add_source(Self::environment())
            .build()?;

        Self::finish(built, Some(path.to_path_buf()))
    }

    /// Load from an in-memory document, still honouring environment overrides
    pub fn load_from_str(contents: &str, format: FileFormat) -> Result<Self> {
        let built = Config::builder()
            .add_source(File::from_str(contents, format))
            .add_source(Self::environment())
            .build()?;

        Self::finish(built, None)
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn finish(built: Config, source: Option<PathBuf>) -> Result<Self> {
        let config: ConnectorConfig = built.try_deserialize()?;
        config.validate()?;

        let manager = Self { config, source };
        debug!(config = %manager.sanitized(), "Connector configuration loaded");
        Ok(manager)
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn into_config(self) -> ConnectorConfig {
        self.config
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The loaded configuration with credential material redacted, for logging
    pub fn sanitized(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or_default();
        redact(&mut value);
        value
    }
}

fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, entry) in map.iter_mut() {
                let sensitive = SENSITIVE_KEYS.iter().any(|k| k == key);
                if sensitive && entry.as_str().is_some_and(|s| !s.is_empty()) {
                    *entry = serde_json::Value::String("***REDACTED***".to_string());
                } else {
                    redact(entry);
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
