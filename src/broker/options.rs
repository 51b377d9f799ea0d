//! Broker-native option types and the lenient mappings from setting strings.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Subscription delivery type. Unrecognized names fall back to `Exclusive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SubscriptionType {
    #[default]
    Exclusive,
    Shared,
    Failover,
    KeyShared,
}

impl SubscriptionType {
    pub fn from_setting(value: &str) -> Self {
        match value {
            "Shared" => Self::Shared,
            "Failover" => Self::Failover,
            "KeyShared" => Self::KeyShared,
            _ => Self::Exclusive,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "Exclusive",
            Self::Shared => "Shared",
            Self::Failover => "Failover",
            Self::KeyShared => "KeyShared",
        }
    }
}

impl From<String> for SubscriptionType {
    fn from(value: String) -> Self {
        Self::from_setting(&value)
    }
}

impl From<SubscriptionType> for String {
    fn from(value: SubscriptionType) -> Self {
        value.as_str().to_string()
    }
}

/// Where a brand-new subscription starts reading. Anything but `Latest` is
/// `Earliest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InitialPosition {
    #[default]
    Earliest,
    Latest,
}

impl InitialPosition {
    pub fn from_setting(value: &str) -> Self {
        if value == "Latest" {
            Self::Latest
        } else {
            Self::Earliest
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "Earliest",
            Self::Latest => "Latest",
        }
    }
}

impl From<String> for InitialPosition {
    fn from(value: String) -> Self {
        Self::from_setting(&value)
    }
}

impl From<InitialPosition> for String {
    fn from(value: InitialPosition) -> Self {
        value.as_str().to_string()
    }
}

/// Producer compression codec. Unrecognized names mean no compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CompressionType {
    #[default]
    None,
    Lz4,
    Zlib,
    Zstd,
}

impl CompressionType {
    pub fn from_setting(value: &str) -> Self {
        match value {
            "LZ4" => Self::Lz4,
            "ZLIB" => Self::Zlib,
            "ZSTD" => Self::Zstd,
            _ => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Lz4 => "LZ4",
            Self::Zlib => "ZLIB",
            Self::Zstd => "ZSTD",
        }
    }
}

impl From<String> for CompressionType {
    fn from(value: String) -> Self {
        Self::from_setting(&value)
    }
}

impl From<CompressionType> for String {
    fn from(value: CompressionType) -> Self {
        value.as_str().to_string()
    }
}

/// Severity for the broker client's internal logger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientLogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl ClientLogLevel {
    /// Map an engine log level name (case-insensitive) onto the client's levels
    pub fn from_engine_level(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" | "TRACE" => Self::Debug,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Broker-native authentication provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Authentication {
    #[default]
    None,
    Tls {
        cert_path: PathBuf,
        key_path: PathBuf,
    },
    Token(String),
    /// Claims-based provider taking arbitrary string parameters
    Claims(BTreeMap<String, String>),
    OAuth2(BTreeMap<String, String>),
}

impl Authentication {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tls { .. } => "tls",
            Self::Token(_) => "token",
            Self::Claims(_) => "claims",
            Self::OAuth2(_) => "oauth2",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    pub url: String,
    pub authentication: Authentication,
    pub tls_trust_certs_file_path: Option<PathBuf>,
    pub tls_allow_insecure_connection: bool,
    pub tls_validate_hostname: bool,
    pub connection_timeout: Duration,
    pub operation_timeout: Duration,
    pub log_level: ClientLogLevel,
}

impl ClientOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            authentication: Authentication::None,
            tls_trust_certs_file_path: None,
            tls_allow_insecure_connection: false,
            tls_validate_hostname: false,
            connection_timeout: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(30),
            log_level: ClientLogLevel::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerOptions {
    pub topic: String,
    pub name: Option<String>,
    pub compression: CompressionType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqPolicy {
    pub max_deliveries: u32,
    pub dead_letter_topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerOptions {
    pub topic: String,
    pub subscription_name: String,
    pub name: String,
    pub subscription_type: SubscriptionType,
    pub initial_position: InitialPosition,
    pub dlq: Option<DlqPolicy>,
    /// `None` leaves the broker's default redelivery delay in place
    pub nack_redelivery_delay: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_subscription_type_mapping() {
        assert_eq!(SubscriptionType::from_setting("Exclusive"), SubscriptionType::Exclusive);
        assert_eq!(SubscriptionType::from_setting("Shared"), SubscriptionType::Shared);
        assert_eq!(SubscriptionType::from_setting("Failover"), SubscriptionType::Failover);
        assert_eq!(SubscriptionType::from_setting("KeyShared"), SubscriptionType::KeyShared);
        assert_eq!(SubscriptionType::from_setting("shared"), SubscriptionType::Exclusive);
    }

    #[test]
    fn test_compression_mapping() {
        assert_eq!(CompressionType::from_setting("LZ4"), CompressionType::Lz4);
        assert_eq!(CompressionType::from_setting("ZLIB"), CompressionType::Zlib);
        assert_eq!(CompressionType::from_setting("ZSTD"), CompressionType::Zstd);
        assert_eq!(CompressionType::from_setting("gzip"), CompressionType::None);
        assert_eq!(CompressionType::from_setting(""), CompressionType::None);
    }

    #[test]
    fn test_serde_round_trip_uses_setting_names() {
        let value = serde_json::to_value(SubscriptionType::KeyShared).unwrap();
        assert_eq!(value, serde_json::json!("KeyShared"));
        let parsed: SubscriptionType = serde_json::from_value(serde_json::json!("Bogus")).unwrap();
        assert_eq!(parsed, SubscriptionType::Exclusive);
    }

    #[test]
    fn test_client_log_level_mapping() {
        assert_eq!(ClientLogLevel::from_engine_level("debug"), ClientLogLevel::Debug);
        assert_eq!(ClientLogLevel::from_engine_level("WARN"), ClientLogLevel::Warn);
        assert_eq!(ClientLogLevel::from_engine_level("ERROR"), ClientLogLevel::Error);
        assert_eq!(ClientLogLevel::from_engine_level(""), ClientLogLevel::Info);
    }

    proptest! {
        #[test]
        fn unknown_subscription_types_default_to_exclusive(name in "[a-zA-Z]{0,12}") {
            prop_assume!(!["Shared", "Failover", "KeyShared"].contains(&name.as_str()));
            prop_assert_eq!(SubscriptionType::from_setting(&name), SubscriptionType::Exclusive);
        }

        #[test]
        fn unknown_compression_is_none(name in "[a-zA-Z0-9]{0,8}") {
            prop_assume!(!["LZ4", "ZLIB", "ZSTD"].contains(&name.as_str()));
            prop_assert_eq!(CompressionType::from_setting(&name), CompressionType::None);
        }

        #[test]
        fn initial_position_is_earliest_unless_latest(name in "[a-zA-Z]{0,10}") {
            let expected = if name == "Latest" { InitialPosition::Latest } else { InitialPosition::Earliest };
            prop_assert_eq!(InitialPosition::from_setting(&name), expected);
        }
    }
}
