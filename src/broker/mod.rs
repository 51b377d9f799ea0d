//! # Broker Client Collaborator
//!
//! Provider-agnostic seams for the pub/sub broker. The connector never talks
//! to the network itself; it drives these traits, and a concrete client
//! library (or the bundled [`in_memory::InMemoryBroker`]) implements them.
//!
//! - [`ClientFactory`] creates a [`BrokerClient`] from [`ClientOptions`]
//! - [`BrokerClient`] hands out producers and consumers sharing one connection
//! - [`Producer`] sends single messages and returns a serializable [`MessageId`]
//! - [`Consumer`] exposes the inbound delivery channel plus ack/nack

mod errors;
pub mod in_memory;
mod message;
mod options;

use std::sync::Arc;

use async_trait::async_trait;

pub use errors::{BrokerError, BrokerResult};
pub use message::{ConsumerMessage, MessageId, ProducerMessage};
pub use options::{
    Authentication, ClientLogLevel, ClientOptions, CompressionType, ConsumerOptions, DlqPolicy,
    InitialPosition, ProducerOptions, SubscriptionType,
};

/// Creates broker clients. Called under the connection handle's write lock.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    async fn create_client(&self, options: &ClientOptions) -> BrokerResult<Arc<dyn BrokerClient>>;
}

/// A live broker client shared by every producer and consumer built from it
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    async fn create_producer(&self, options: ProducerOptions) -> BrokerResult<Arc<dyn Producer>>;

    async fn subscribe(&self, options: ConsumerOptions) -> BrokerResult<Arc<dyn Consumer>>;

    /// Tear down sockets and background work owned by the client
    async fn close(&self);
}

#[async_trait]
pub trait Producer: Send + Sync + 'static {
    fn topic(&self) -> &str;

    async fn send(&self, message: ProducerMessage) -> BrokerResult<MessageId>;

    async fn close(&self);
}

#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    fn subscription(&self) -> &str;

    /// Wait for the next delivery.
    ///
    /// Returns `None` when the delivery channel is closed or unreadable. The
    /// caller decides whether to back off and wait again.
    async fn receive(&self) -> Option<ConsumerMessage>;

    async fn ack(&self, message: &ConsumerMessage) -> BrokerResult<()>;

    /// Negative acknowledge; redelivery and dead-lettering are broker policy
    async fn nack(&self, message: &ConsumerMessage) -> BrokerResult<()>;

    async fn close(&self);
}
