//! # Broker Error Types
//!
//! What the broker client collaborator reports back to the connector.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker unreachable: {message}")]
    Unreachable { message: String },

    #[error("Authentication rejected: {message}")]
    AuthenticationRejected { message: String },

    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("Consumer busy: subscription {subscription} on {topic} already has an exclusive consumer")]
    ConsumerBusy { topic: String, subscription: String },

    #[error("Operation {operation} timed out after {timeout_seconds}s")]
    Timeout {
        operation: String,
        timeout_seconds: u64,
    },

    #[error("Handle is closed")]
    Closed,

    #[error("Broker error: {message}")]
    Other { message: String },
}

impl BrokerError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    pub fn authentication_rejected(message: impl Into<String>) -> Self {
        Self::AuthenticationRejected {
            message: message.into(),
        }
    }

    pub fn topic_not_found(topic: impl Into<String>) -> Self {
        Self::TopicNotFound {
            topic: topic.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_seconds,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Errors that mean the underlying client is no longer usable and should
    /// be re-created on the next attempt
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::Timeout { .. } | Self::Closed
        )
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
