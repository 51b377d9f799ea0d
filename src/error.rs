//! # Connector Error Types
//!
//! Errors that cross the connector boundary. Steady-state failures (lost
//! connectivity, undecodable payloads, failing handlers) are absorbed by the
//! subscription workers and only logged; configuration and explicit send
//! failures surface here.

use thiserror::Error;

use crate::broker::BrokerError;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Credential staging error: {message}")]
    Credential { message: String },

    #[error("Broker connection error: {source}")]
    Connection {
        #[source]
        source: BrokerError,
    },

    #[error("Publisher could not send message to {topic}: {source}")]
    Send {
        topic: String,
        #[source]
        source: BrokerError,
    },

    #[error("Message decode error: {message}")]
    Decode { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl ConnectorError {
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn credential(message: impl Into<String>) -> Self {
        Self::Credential {
            message: message.into(),
        }
    }

    pub fn connection(source: BrokerError) -> Self {
        Self::Connection { source }
    }

    pub fn send(topic: impl Into<String>, source: BrokerError) -> Self {
        Self::Send {
            topic: topic.into(),
            source,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }

    /// Whether this error is a fail-fast configuration problem
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::Credential { .. })
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::configuration("settings", err.to_string())
    }
}

impl From<config::ConfigError> for ConnectorError {
    fn from(err: config::ConfigError) -> Self {
        ConnectorError::configuration("config", err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
