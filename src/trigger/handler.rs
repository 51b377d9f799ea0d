//! # Message Handler Seam
//!
//! The downstream handler the host runtime registers for a subscription, and
//! the record each delivery is turned into before the handler sees it.

use std::collections::HashMap;

use async_trait::async_trait;
use opentelemetry::global;
use serde::{Deserialize, Serialize};

use crate::broker::ConsumerMessage;
use crate::config::PayloadFormat;
use crate::error::{ConnectorError, Result};

/// Result attribute a handler sets to `true` to nack an otherwise successful call
pub const NACK_ATTRIBUTE: &str = "_nack";

/// Older flows write the attribute with a leading space. Both spellings are
/// honoured; `true` under either key requests the nack.
pub const LEGACY_NACK_ATTRIBUTE: &str = " _nack";

/// Attributes returned by a successful handler call
pub type HandlerAttributes = HashMap<String, serde_json::Value>;

#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn handle(
        &self,
        context: HandlerContext,
        output: SubscriberOutput,
    ) -> anyhow::Result<HandlerAttributes>;
}

/// Record handed to the handler for one delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberOutput {
    pub payload: serde_json::Value,
    pub properties: HashMap<String, String>,
    pub topic: String,
    pub msgid: String,
    pub redelivery_count: u32,
}

impl SubscriberOutput {
    /// Decode a delivery; JSON payloads that do not parse are a decode error
    pub fn from_message(message: &ConsumerMessage, format: PayloadFormat) -> Result<Self> {
        let payload = match format {
            PayloadFormat::Json => serde_json::from_slice(&message.payload)
                .map_err(|e| ConnectorError::decode(e.to_string()))?,
            PayloadFormat::Raw => {
                serde_json::Value::String(String::from_utf8_lossy(&message.payload).into_owned())
            }
        };

        Ok(Self {
            payload,
            properties: message.properties.clone(),
            topic: message.topic.clone(),
            msgid: message.id.map(|id| id.to_hex()).unwrap_or_default(),
            redelivery_count: message.redelivery_count,
        })
    }
}

/// Per-delivery context for the handler call
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub handler_name: String,
    /// Correlation id for the downstream call; the hex message id when known
    pub event_id: Option<String>,
    /// Trace context carried in the message properties, if any
    pub trace_context: opentelemetry::Context,
}

impl HandlerContext {
    pub fn for_delivery(handler_name: &str, output: &SubscriberOutput) -> Self {
        let trace_context =
            global::get_text_map_propagator(|propagator| propagator.extract(&output.properties));

        Self {
            handler_name: handler_name.to_string(),
            event_id: (!output.msgid.is_empty()).then(|| output.msgid.clone()),
            trace_context,
        }
    }
}

/// Whether the handler asked for a nack despite succeeding
pub fn requests_nack(attributes: &HandlerAttributes) -> bool {
    [NACK_ATTRIBUTE, LEGACY_NACK_ATTRIBUTE].iter().any(|key| {
        attributes
            .get(*key)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    })
}
