//! # Connector Context
//!
//! Process-level facts the connector needs, gathered once and handed to each
//! component at construction: application identity, local host name, and the
//! broker client's log severity.

use serde::{Deserialize, Serialize};

use crate::broker::ClientLogLevel;

/// Environment variable holding the host engine's log level
pub const ENGINE_LOG_LEVEL_ENV: &str = "ENGINE_LOG_LEVEL";

/// Application identity supplied by the host runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorContext {
    pub app: AppInfo,
    pub host_name: String,
    pub client_log_level: ClientLogLevel,
}

impl ConnectorContext {
    pub fn new(app: AppInfo) -> Self {
        let client_log_level = std::env::var(ENGINE_LOG_LEVEL_ENV)
            .map(|level| ClientLogLevel::from_engine_level(&level))
            .unwrap_or_default();

        Self {
            app,
            host_name: resolve_host_name(),
            client_log_level,
        }
    }

    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn with_client_log_level(mut self, level: ClientLogLevel) -> Self {
        self.client_log_level = level;
        self
    }

    /// Stable name for a producer or consumer owned by `component`, so the
    /// broker can recognise the same participant across restarts
    pub fn participant_name(&self, component: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            self.app.name, self.app.version, component, self.host_name
        )
    }
}

/// Local host name, or the current epoch milliseconds when it is unknown
fn resolve_host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis().to_string())
}
