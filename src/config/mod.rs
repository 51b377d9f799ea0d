//! # Connector Configuration
//!
//! Typed settings decoded from the host runtime's settings maps (or from a
//! config file via [`ConfigManager`]). Every struct validates at construction
//! so a misconfigured connector fails before anything starts.
//!
//! ## Usage
//!
//! ```rust
//! use pulsar_connector::config::SubscriptionSettings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = serde_json::json!({
//!     "topic": "persistent://public/default/orders",
//!     "subscription": "billing",
//!     "subscriptionType": "Shared",
//!     "processingMode": "Async",
//!     "format": "JSON"
//! });
//! let settings = SubscriptionSettings::from_settings(settings.as_object().unwrap())?;
//! assert!(settings.processing_mode.is_async());
//! # Ok(())
//! # }
//! ```

pub mod loader;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::broker::{
    CompressionType, ConsumerOptions, DlqPolicy, InitialPosition, SubscriptionType,
};
use crate::context::AppInfo;
use crate::error::{ConnectorError, Result};

pub use loader::ConfigManager;

/// Used when a timeout setting is absent or not positive
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// In-flight cap for the direct runner
pub const DEFAULT_MAX_IN_FLIGHT: usize = 200;

/// Settings map as supplied by the host runtime
pub type SettingsMap = serde_json::Map<String, serde_json::Value>;

fn decode<T: DeserializeOwned>(component: &str, settings: &SettingsMap) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(settings.clone()))
        .map_err(|e| ConnectorError::configuration(component, e.to_string()))
}

/// Authentication kind named in the connection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthKind {
    #[default]
    #[serde(rename = "", alias = "None")]
    None,
    #[serde(rename = "TLS")]
    Tls,
    #[serde(rename = "JWT")]
    Jwt,
    #[serde(rename = "Athenz")]
    Athenz,
    #[serde(rename = "OAuth2")]
    OAuth2,
}

/// Resolved authentication, carrying only what each mode needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    None,
    Tls {
        cert_file: String,
        key_file: String,
    },
    Token {
        jwt: String,
    },
    ClaimsBased {
        params: BTreeMap<String, String>,
    },
    OAuth2 {
        issuer_url: String,
        audience: String,
        scope: String,
        private_key: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    pub url: String,
    #[serde(alias = "cacert")]
    pub ca_cert: String,
    #[serde(alias = "certfile")]
    pub cert_file: String,
    #[serde(alias = "keyfile")]
    pub key_file: String,
    pub auth: AuthKind,
    #[serde(alias = "athenzauth")]
    pub athenz_auth: BTreeMap<String, String>,
    pub jwt: String,
    #[serde(alias = "allowinsecure")]
    pub allow_insecure: bool,
    #[serde(alias = "conntimeout")]
    pub conn_timeout: i64,
    #[serde(alias = "optimeout")]
    pub op_timeout: i64,
    pub audience: String,
    #[serde(alias = "privatekey")]
    pub private_key: String,
    pub scope: String,
    #[serde(alias = "issuerurl")]
    pub issuer_url: String,
}

impl ConnectionSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &SettingsMap) -> Result<Self> {
        let parsed: Self = decode("connection", settings)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ConnectorError::configuration(
                "connection",
                "url is required",
            ));
        }

        match self.auth {
            AuthKind::Jwt if self.jwt.is_empty() => Err(ConnectorError::configuration(
                "connection",
                "JWT authentication requires a jwt token",
            )),
            AuthKind::Tls if self.cert_file.is_empty() || self.key_file.is_empty() => {
                Err(ConnectorError::configuration(
                    "connection",
                    "TLS authentication requires certFile and keyFile",
                ))
            }
            AuthKind::OAuth2 if self.issuer_url.is_empty() => Err(ConnectorError::configuration(
                "connection",
                "OAuth2 authentication requires issuerUrl",
            )),
            _ => Ok(()),
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        match self.auth {
            AuthKind::None => AuthMode::None,
            AuthKind::Tls => AuthMode::Tls {
                cert_file: self.cert_file.clone(),
                key_file: self.key_file.clone(),
            },
            AuthKind::Jwt => AuthMode::Token {
                jwt: self.jwt.clone(),
            },
            AuthKind::Athenz => AuthMode::ClaimsBased {
                params: self.athenz_auth.clone(),
            },
            AuthKind::OAuth2 => AuthMode::OAuth2 {
                issuer_url: self.issuer_url.clone(),
                audience: self.audience.clone(),
                scope: self.scope.clone(),
                private_key: self.private_key.clone(),
            },
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        positive_seconds(self.conn_timeout)
    }

    pub fn operation_timeout(&self) -> Duration {
        positive_seconds(self.op_timeout)
    }

    pub fn uses_tls_transport(&self) -> bool {
        self.url.contains("pulsar+ssl")
    }

    pub fn has_credential_material(&self) -> bool {
        !self.cert_file.is_empty()
            || !self.key_file.is_empty()
            || !self.ca_cert.is_empty()
            || !self.private_key.is_empty()
    }
}

fn positive_seconds(value: i64) -> Duration {
    if value <= 0 {
        Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)
    } else {
        Duration::from_secs(value as u64)
    }
}

/// How a worker dispatches deliveries to its handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessingMode {
    #[default]
    Sync,
    Async,
}

impl ProcessingMode {
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async)
    }
}

impl From<String> for ProcessingMode {
    fn from(value: String) -> Self {
        if value == "Async" {
            Self::Async
        } else {
            Self::Sync
        }
    }
}

impl From<ProcessingMode> for String {
    fn from(value: ProcessingMode) -> Self {
        match value {
            ProcessingMode::Sync => "Sync".to_string(),
            ProcessingMode::Async => "Async".to_string(),
        }
    }
}

/// Shape of the payload handed to the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PayloadFormat {
    #[default]
    Raw,
    Json,
}

impl From<String> for PayloadFormat {
    fn from(value: String) -> Self {
        if value == "JSON" {
            Self::Json
        } else {
            Self::Raw
        }
    }
}

impl From<PayloadFormat> for String {
    fn from(value: PayloadFormat) -> Self {
        match value {
            PayloadFormat::Raw => "String".to_string(),
            PayloadFormat::Json => "JSON".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSettings {
    /// Overrides the registered handler's name in the consumer name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub subscription: String,
    #[serde(default, alias = "subscriptiontype")]
    pub subscription_type: SubscriptionType,
    #[serde(default, alias = "initialposition")]
    pub initial_position: InitialPosition,
    #[serde(default, alias = "dlqtopic")]
    pub dlq_topic: String,
    #[serde(default, alias = "dlqmaxdeliveries")]
    pub dlq_max_deliveries: u32,
    /// Seconds; zero keeps the broker default
    #[serde(default, alias = "nackredeliverydelay")]
    pub nack_redelivery_delay: u64,
    #[serde(default, alias = "processingmode")]
    pub processing_mode: ProcessingMode,
    #[serde(default)]
    pub format: PayloadFormat,
}

impl SubscriptionSettings {
    pub fn new(topic: impl Into<String>, subscription: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscription: subscription.into(),
            ..Default::default()
        }
    }

    pub fn from_settings(settings: &SettingsMap) -> Result<Self> {
        let parsed: Self = decode("subscription", settings)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(ConnectorError::configuration(
                "subscription",
                "topic is required",
            ));
        }
        if self.subscription.trim().is_empty() {
            return Err(ConnectorError::configuration(
                "subscription",
                format!("subscription name is required for topic {}", self.topic),
            ));
        }
        Ok(())
    }

    pub fn handler_name<'a>(&'a self, registered: &'a str) -> &'a str {
        if self.name.is_empty() {
            registered
        } else {
            &self.name
        }
    }

    pub fn dead_letter_policy(&self) -> Option<DlqPolicy> {
        (!self.dlq_topic.is_empty()).then(|| DlqPolicy {
            max_deliveries: self.dlq_max_deliveries,
            dead_letter_topic: self.dlq_topic.clone(),
        })
    }

    pub fn redelivery_delay(&self) -> Option<Duration> {
        (self.nack_redelivery_delay != 0).then(|| Duration::from_secs(self.nack_redelivery_delay))
    }

    pub fn consumer_options(&self, consumer_name: impl Into<String>) -> ConsumerOptions {
        ConsumerOptions {
            topic: self.topic.clone(),
            subscription_name: self.subscription.clone(),
            name: consumer_name.into(),
            subscription_type: self.subscription_type,
            initial_position: self.initial_position,
            dlq: self.dead_letter_policy(),
            nack_redelivery_delay: self.redelivery_delay(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherSettings {
    #[serde(default)]
    pub topic: String,
    #[serde(default, alias = "compressiontype")]
    pub compression_type: CompressionType,
}

impl PublisherSettings {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            compression_type: CompressionType::None,
        }
    }

    pub fn from_settings(settings: &SettingsMap) -> Result<Self> {
        let parsed: Self = decode("publisher", settings)?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        if self.topic.trim().is_empty() {
            return Err(ConnectorError::configuration(
                "publisher",
                "no topic specified",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunnerType {
    #[default]
    #[serde(alias = "direct")]
    Direct,
    #[serde(alias = "pooled")]
    Pooled,
}

/// How the host runtime runs handlers; decides the async in-flight cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerSettings {
    #[serde(alias = "runnertype")]
    pub runner_type: RunnerType,
    pub workers: usize,
}

impl RunnerSettings {
    pub fn max_in_flight(&self) -> usize {
        match self.runner_type {
            RunnerType::Pooled => self.workers.max(1),
            RunnerType::Direct => DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Whole-connector configuration as loaded by [`ConfigManager`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub app: AppInfo,
    #[serde(default)]
    pub runner: RunnerSettings,
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSettings>,
    #[serde(default)]
    pub publishers: Vec<PublisherSettings>,
}

impl ConnectorConfig {
    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        for subscription in &self.subscriptions {
            subscription.validate()?;
        }
        for publisher in &self.publishers {
            publisher.validate()?;
        }
        Ok(())
    }
}
