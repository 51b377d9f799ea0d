//! # Publisher
//!
//! Sends single messages to one topic through a shared [`ConnectionHandle`].
//! The producer is created on the first send and cached for the life of the
//! publisher. Send failures are returned to the caller as-is; nothing here
//! retries.

use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::global;
use opentelemetry::Context;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::broker::{CompressionType, MessageId, Producer, ProducerMessage, ProducerOptions};
use crate::config::PublisherSettings;
use crate::connection::ConnectionHandle;
use crate::context::ConnectorContext;
use crate::error::{ConnectorError, Result};

/// Input of the publish activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishInput {
    pub payload: Option<serde_json::Value>,
    pub properties: HashMap<String, String>,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutput {
    pub msgid: String,
}

pub struct Publisher {
    topic: String,
    compression: CompressionType,
    producer_name: String,
    connection: Arc<ConnectionHandle>,
    producer: Mutex<Option<Arc<dyn Producer>>>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("compression", &self.compression)
            .field("producer_name", &self.producer_name)
            .finish()
    }
}

impl Publisher {
    /// `component` identifies the owning activity in the producer name
    pub fn new(
        settings: &PublisherSettings,
        connection: Arc<ConnectionHandle>,
        context: &ConnectorContext,
        component: &str,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            topic: settings.topic.clone(),
            compression: settings.compression_type,
            producer_name: context.participant_name(component),
            connection,
            producer: Mutex::new(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn producer_name(&self) -> &str {
        &self.producer_name
    }

    #[instrument(skip(self, payload, properties), fields(topic = %self.topic, bytes = payload.len()))]
    pub async fn send(
        &self,
        payload: Vec<u8>,
        properties: HashMap<String, String>,
        key: Option<String>,
    ) -> Result<MessageId> {
        let producer = self.producer().await?;

        let message = ProducerMessage {
            payload,
            key,
            properties,
        };
        let id = producer
            .send(message)
            .await
            .map_err(|e| ConnectorError::send(&self.topic, e))?;

        debug!(msgid = %id, "Message published");
        Ok(id)
    }

    /// Publish activity: coerce the payload, carry the current trace context
    /// in the properties, and return the hex message id
    pub async fn publish(&self, input: PublishInput) -> Result<PublishOutput> {
        let PublishInput {
            payload,
            mut properties,
            key,
        } = input;

        inject_trace_context(&Context::current(), &mut properties);
        let key = (!key.is_empty()).then_some(key);

        let id = self.send(payload_bytes(payload), properties, key).await?;
        Ok(PublishOutput { msgid: id.to_hex() })
    }

    /// Release the cached producer, if one was created
    pub async fn close(&self) {
        if let Some(producer) = self.producer.lock().await.take() {
            producer.close().await;
            info!(topic = %self.topic, "Producer closed");
        }
    }

    async fn producer(&self) -> Result<Arc<dyn Producer>> {
        let mut cached = self.producer.lock().await;
        if let Some(producer) = cached.as_ref() {
            return Ok(Arc::clone(producer));
        }

        let options = ProducerOptions {
            topic: self.topic.clone(),
            name: Some(self.producer_name.clone()),
            compression: self.compression,
        };
        let producer = self
            .connection
            .producer(options)
            .await
            .map_err(|e| match e {
                ConnectorError::Connection { source } => ConnectorError::send(&self.topic, source),
                other => other,
            })?;

        info!(topic = %self.topic, name = %self.producer_name, "Producer created");
        *cached = Some(Arc::clone(&producer));
        Ok(producer)
    }
}

fn payload_bytes(payload: Option<serde_json::Value>) -> Vec<u8> {
    match payload {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::String(text)) => text.into_bytes(),
        Some(other) => other.to_string().into_bytes(),
    }
}

pub(crate) fn inject_trace_context(context: &Context, properties: &mut HashMap<String, String>) {
    global::get_text_map_propagator(|propagator| propagator.inject_context(context, properties));
}
