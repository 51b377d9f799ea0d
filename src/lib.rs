#![allow(clippy::doc_markdown)] // Allow technical terms like OAuth2, JWT in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pulsar Connector
//!
//! Connector between a host runtime and a Pulsar-style pub/sub broker.
//!
//! ## Overview
//!
//! The host supplies settings maps, application identity and message handlers;
//! the connector turns them into a shared broker connection, publishers that
//! send single messages, and subscription workers that consume, hand each
//! delivery to a handler and acknowledge the outcome.
//!
//! ## Key Features
//!
//! - **Lazy, shared connection**: one broker client per connector, created on
//!   demand under an exclusive lock and recreated after connectivity loss
//! - **Credential staging**: inline base64 certificates and keys are written to
//!   a private temp directory and removed on release
//! - **Sync and async consumption**: strict in-order handling, or concurrent
//!   handling behind a draining in-flight window
//! - **Never-give-up subscribe loop**: workers started before the broker is
//!   reachable keep retrying and begin consuming once it is
//! - **Trace propagation**: W3C trace context travels in message properties
//!
//! ## Module Organization
//!
//! - [`broker`] - Broker client seams and the in-memory broker
//! - [`config`] - Typed settings and the file/environment loader
//! - [`connection`] - Connection handle and credential staging
//! - [`context`] - Application identity and broker client log level
//! - [`publisher`] - Single-message publishing
//! - [`trigger`] - Subscription workers and their coordinator
//! - [`logging`] - Structured logging setup
//! - [`error`] - Connector error types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pulsar_connector::broker::in_memory::InMemoryBroker;
//! use pulsar_connector::config::{ConnectionSettings, PublisherSettings};
//! use pulsar_connector::connection::ConnectionHandle;
//! use pulsar_connector::context::{AppInfo, ConnectorContext};
//! use pulsar_connector::publisher::{PublishInput, Publisher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! pulsar_connector::logging::init_structured_logging();
//!
//! let context = ConnectorContext::new(AppInfo::default());
//! let connection = ConnectionHandle::establish(
//!     &ConnectionSettings::new("pulsar://localhost:6650"),
//!     Arc::new(InMemoryBroker::new()),
//!     &context,
//! )
//! .await?;
//!
//! let publisher = Publisher::new(
//!     &PublisherSettings::new("persistent://public/default/orders"),
//!     connection,
//!     &context,
//!     "orders-publish",
//! )?;
//!
//! let output = publisher
//!     .publish(PublishInput {
//!         payload: Some(serde_json::json!({"order": 42})),
//!         ..Default::default()
//!     })
//!     .await?;
//! println!("published {}", output.msgid);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! Everything runs against [`broker::in_memory::InMemoryBroker`]; no broker
//! needs to be running:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod broker;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod logging;
pub mod publisher;
pub mod trigger;

pub use config::{
    ConfigManager, ConnectionSettings, ConnectorConfig, PublisherSettings, RunnerSettings,
    SubscriptionSettings,
};
pub use connection::ConnectionHandle;
pub use context::{AppInfo, ConnectorContext};
pub use error::{ConnectorError, Result};
pub use publisher::{PublishInput, PublishOutput, Publisher};
pub use trigger::{
    HandlerAttributes, HandlerContext, MessageHandler, RetryPolicy, SubscriberOutput,
    SubscriptionWorker, TriggerCoordinator, WorkerState,
};
