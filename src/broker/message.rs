//! Messages flowing to and from the broker.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

const SERIALIZED_LEN: usize = 24;

/// Broker-assigned message identity.
///
/// Serializes to a fixed 24-byte big-endian layout, so its hex form is always
/// 48 characters. Publisher output and subscriber output both use [`to_hex`],
/// which keeps the two identical for the same message.
///
/// [`to_hex`]: MessageId::to_hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    pub ledger_id: u64,
    pub entry_id: u64,
    pub partition: i32,
    pub batch_index: i32,
}

impl MessageId {
    pub fn new(ledger_id: u64, entry_id: u64, partition: i32, batch_index: i32) -> Self {
        Self {
            ledger_id,
            entry_id,
            partition,
            batch_index,
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SERIALIZED_LEN);
        bytes.extend_from_slice(&self.ledger_id.to_be_bytes());
        bytes.extend_from_slice(&self.entry_id.to_be_bytes());
        bytes.extend_from_slice(&self.partition.to_be_bytes());
        bytes.extend_from_slice(&self.batch_index.to_be_bytes());
        bytes
    }

    pub fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SERIALIZED_LEN {
            return None;
        }
        let ledger_id = u64::from_be_bytes(bytes[0..8].try_into().ok()?);
        let entry_id = u64::from_be_bytes(bytes[8..16].try_into().ok()?);
        let partition = i32::from_be_bytes(bytes[16..20].try_into().ok()?);
        let batch_index = i32::from_be_bytes(bytes[20..24].try_into().ok()?);
        Some(Self::new(ledger_id, entry_id, partition, batch_index))
    }

    /// Lowercase hex of the serialized identity
    pub fn to_hex(&self) -> String {
        self.serialize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.ledger_id, self.entry_id, self.partition, self.batch_index
        )
    }
}

/// Outbound message handed to a [`Producer`](super::Producer)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProducerMessage {
    pub payload: Vec<u8>,
    pub key: Option<String>,
    pub properties: HashMap<String, String>,
}

impl ProducerMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// One inbound delivery. Lives for a single handling cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerMessage {
    pub id: Option<MessageId>,
    pub topic: String,
    pub payload: Vec<u8>,
    pub key: Option<String>,
    pub properties: HashMap<String, String>,
    pub redelivery_count: u32,
    pub publish_time: DateTime<Utc>,
}
