//! # In-Memory Broker
//!
//! Thread-safe in-memory implementation of every broker collaborator trait,
//! for tests and local development.
//!
//! ## Features
//!
//! - **Topics with backlog**: `Earliest` subscriptions replay everything published so far
//! - **Redelivery**: nacked messages come back after the subscription's redelivery delay
//! - **Dead-lettering**: honours [`DlqPolicy`] once the delivery limit is reached
//! - **Fault injection**: the next N connects, subscribes or sends can be made to fail
//! - **Recording**: acks, nacks, client creations and subscribe attempts are observable

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    BrokerClient, BrokerError, BrokerResult, ClientFactory, ClientOptions, Consumer,
    ConsumerMessage, ConsumerOptions, DlqPolicy, InitialPosition, MessageId, Producer,
    ProducerMessage, ProducerOptions, SubscriptionType,
};

const LEDGER_ID: u64 = 1;
const DEFAULT_NACK_REDELIVERY_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct SubscriptionState {
    subscription_type: SubscriptionType,
    sender: Option<mpsc::UnboundedSender<ConsumerMessage>>,
    /// Identifies the consumer currently attached, so a stale close is ignored
    consumer_generation: u64,
    unacked: BTreeMap<MessageId, ConsumerMessage>,
    dlq: Option<DlqPolicy>,
    nack_redelivery_delay: Duration,
}

impl SubscriptionState {
    fn deliver(&mut self, message: ConsumerMessage) {
        if let Some(id) = message.id {
            self.unacked.insert(id, message.clone());
        }
        if let Some(sender) = &self.sender {
            let _ = sender.send(message);
        }
    }

    fn has_active_consumer(&self) -> bool {
        self.sender.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

#[derive(Debug, Default)]
struct TopicState {
    backlog: Vec<ConsumerMessage>,
    subscriptions: HashMap<String, SubscriptionState>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, TopicState>>,
    next_entry: AtomicU64,
    next_generation: AtomicU64,
    client_attempts: AtomicUsize,
    clients_created: AtomicUsize,
    subscribe_attempts: AtomicUsize,
    pending_connect_failures: AtomicUsize,
    pending_subscribe_failures: AtomicUsize,
    pending_send_failures: AtomicUsize,
    acked: Mutex<Vec<MessageId>>,
    nacked: Mutex<Vec<MessageId>>,
    last_client_options: Mutex<Option<ClientOptions>>,
    producers: Mutex<Vec<ProducerOptions>>,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl BrokerState {
    fn publish(&self, topic: &str, message: ProducerMessage) -> MessageId {
        let entry = self.next_entry.fetch_add(1, Ordering::SeqCst);
        let id = MessageId::new(LEDGER_ID, entry, 0, -1);
        let delivery = ConsumerMessage {
            id: Some(id),
            topic: topic.to_string(),
            payload: message.payload,
            key: message.key,
            properties: message.properties,
            redelivery_count: 0,
            publish_time: Utc::now(),
        };

        let mut topics = self.topics.lock();
        let state = topics.entry(topic.to_string()).or_default();
        state.backlog.push(delivery.clone());
        for subscription in state.subscriptions.values_mut() {
            subscription.deliver(delivery.clone());
        }
        id
    }

    fn subscribe(&self, options: &ConsumerOptions) -> BrokerResult<(u64, mpsc::UnboundedReceiver<ConsumerMessage>)> {
        let mut topics = self.topics.lock();
        let topic = topics.entry(options.topic.clone()).or_default();
        let is_new = !topic.subscriptions.contains_key(&options.subscription_name);

        if let Some(existing) = topic.subscriptions.get(&options.subscription_name) {
            if existing.subscription_type == SubscriptionType::Exclusive
                && existing.has_active_consumer()
            {
                return Err(BrokerError::ConsumerBusy {
                    topic: options.topic.clone(),
                    subscription: options.subscription_name.clone(),
                });
            }
        }

        let backlog = if is_new && options.initial_position == InitialPosition::Earliest {
            topic.backlog.clone()
        } else {
            Vec::new()
        };

        let subscription = topic
            .subscriptions
            .entry(options.subscription_name.clone())
            .or_insert_with(|| SubscriptionState {
                subscription_type: options.subscription_type,
                sender: None,
                consumer_generation: 0,
                unacked: BTreeMap::new(),
                dlq: None,
                nack_redelivery_delay: DEFAULT_NACK_REDELIVERY_DELAY,
            });

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        subscription.subscription_type = options.subscription_type;
        subscription.dlq = options.dlq.clone();
        subscription.nack_redelivery_delay = options
            .nack_redelivery_delay
            .unwrap_or(DEFAULT_NACK_REDELIVERY_DELAY);
        subscription.consumer_generation = generation;
        subscription.sender = Some(tx);

        if is_new {
            for message in backlog {
                subscription.deliver(message);
            }
        } else {
            // Reattaching consumer gets everything still unacknowledged
            let pending: Vec<_> = subscription.unacked.values().cloned().collect();
            if let Some(sender) = &subscription.sender {
                for message in pending {
                    let _ = sender.send(message);
                }
            }
        }

        Ok((generation, rx))
    }

    fn detach(&self, topic: &str, subscription: &str, generation: u64) {
        let mut topics = self.topics.lock();
        if let Some(state) = topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(subscription))
        {
            if state.consumer_generation == generation {
                state.sender = None;
            }
        }
    }

    fn ack(&self, topic: &str, subscription: &str, id: MessageId) {
        self.acked.lock().push(id);
        let mut topics = self.topics.lock();
        if let Some(state) = topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(subscription))
        {
            state.unacked.remove(&id);
        }
    }

    fn nack(self: &Arc<Self>, topic: &str, subscription: &str, message: &ConsumerMessage) {
        let Some(id) = message.id else {
            return;
        };
        self.nacked.lock().push(id);

        let mut dead_letter = None;
        let mut redelivery = None;
        {
            let mut topics = self.topics.lock();
            let Some(state) = topics
                .get_mut(topic)
                .and_then(|t| t.subscriptions.get_mut(subscription))
            else {
                return;
            };

            let deliveries = message.redelivery_count + 1;
            match &state.dlq {
                Some(policy) if policy.max_deliveries > 0 && deliveries >= policy.max_deliveries => {
                    state.unacked.remove(&id);
                    dead_letter = Some(policy.dead_letter_topic.clone());
                }
                _ => {
                    let mut redelivered = message.clone();
                    redelivered.redelivery_count = deliveries;
                    state.unacked.insert(id, redelivered.clone());
                    redelivery = Some((redelivered, state.nack_redelivery_delay));
                }
            }
        }

        if let Some(dlq_topic) = dead_letter {
            debug!(message_id = %id, dlq_topic = %dlq_topic, "Routing message to dead-letter topic");
            let forwarded = ProducerMessage {
                payload: message.payload.clone(),
                key: message.key.clone(),
                properties: message.properties.clone(),
            };
            self.publish(&dlq_topic, forwarded);
        }

        if let Some((redelivered, delay)) = redelivery {
            let state = Arc::clone(self);
            let topic = topic.to_string();
            let subscription = subscription.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let topics = state.topics.lock();
                if let Some(sub) = topics
                    .get(&topic)
                    .and_then(|t| t.subscriptions.get(&subscription))
                {
                    if sub.unacked.contains_key(&id) {
                        if let Some(sender) = &sub.sender {
                            let _ = sender.send(redelivered);
                        }
                    }
                }
            });
        }
    }
}

/// In-memory broker acting as its own [`ClientFactory`]
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish directly, bypassing any producer
    pub fn publish(&self, topic: &str, message: ProducerMessage) -> MessageId {
        self.state.publish(topic, message)
    }

    /// Make the next `count` client creations fail as unreachable
    pub fn fail_next_connects(&self, count: usize) {
        self.state
            .pending_connect_failures
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next `count` subscribe calls fail as unreachable
    pub fn fail_next_subscribes(&self, count: usize) {
        self.state
            .pending_subscribe_failures
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next `count` producer sends fail
    pub fn fail_next_sends(&self, count: usize) {
        self.state
            .pending_send_failures
            .fetch_add(count, Ordering::SeqCst);
    }

    pub fn client_attempts(&self) -> usize {
        self.state.client_attempts.load(Ordering::SeqCst)
    }

    pub fn clients_created(&self) -> usize {
        self.state.clients_created.load(Ordering::SeqCst)
    }

    pub fn subscribe_attempts(&self) -> usize {
        self.state.subscribe_attempts.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> Vec<MessageId> {
        self.state.acked.lock().clone()
    }

    pub fn nacked(&self) -> Vec<MessageId> {
        self.state.nacked.lock().clone()
    }

    /// Every message ever published to `topic`, in publish order
    pub fn backlog(&self, topic: &str) -> Vec<ConsumerMessage> {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|t| t.backlog.clone())
            .unwrap_or_default()
    }

    pub fn unacked_count(&self, topic: &str, subscription: &str) -> usize {
        self.state
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.subscriptions.get(subscription))
            .map(|s| s.unacked.len())
            .unwrap_or(0)
    }

    pub fn has_active_consumer(&self, topic: &str, subscription: &str) -> bool {
        self.state
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.subscriptions.get(subscription))
            .is_some_and(SubscriptionState::has_active_consumer)
    }

    pub fn last_client_options(&self) -> Option<ClientOptions> {
        self.state.last_client_options.lock().clone()
    }

    pub fn producer_options(&self) -> Vec<ProducerOptions> {
        self.state.producers.lock().clone()
    }
}

#[async_trait]
impl ClientFactory for InMemoryBroker {
    async fn create_client(&self, options: &ClientOptions) -> BrokerResult<Arc<dyn BrokerClient>> {
        self.state.client_attempts.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.state.pending_connect_failures) {
            return Err(BrokerError::unreachable(format!(
                "connection refused: {}",
                options.url
            )));
        }

        self.state.clients_created.fetch_add(1, Ordering::SeqCst);
        *self.state.last_client_options.lock() = Some(options.clone());

        Ok(Arc::new(InMemoryClient {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct InMemoryClient {
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    async fn create_producer(&self, options: ProducerOptions) -> BrokerResult<Arc<dyn Producer>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        self.state.producers.lock().push(options.clone());
        Ok(Arc::new(InMemoryProducer {
            state: Arc::clone(&self.state),
            topic: options.topic,
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscribe(&self, options: ConsumerOptions) -> BrokerResult<Arc<dyn Consumer>> {
        self.state.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        if take_failure(&self.state.pending_subscribe_failures) {
            return Err(BrokerError::unreachable(format!(
                "subscribe to {} refused",
                options.topic
            )));
        }

        let (generation, receiver) = self.state.subscribe(&options)?;
        Ok(Arc::new(InMemoryConsumer {
            state: Arc::clone(&self.state),
            topic: options.topic,
            subscription: options.subscription_name,
            generation,
            receiver: tokio::sync::Mutex::new(receiver),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct InMemoryProducer {
    state: Arc<BrokerState>,
    topic: String,
    closed: AtomicBool,
}

#[async_trait]
impl Producer for InMemoryProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, message: ProducerMessage) -> BrokerResult<MessageId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Closed);
        }
        if take_failure(&self.state.pending_send_failures) {
            return Err(BrokerError::other(format!("send to {} rejected", self.topic)));
        }
        Ok(self.state.publish(&self.topic, message))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct InMemoryConsumer {
    state: Arc<BrokerState>,
    topic: String,
    subscription: String,
    generation: u64,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<ConsumerMessage>>,
    closed: AtomicBool,
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    fn subscription(&self) -> &str {
        &self.subscription
    }

    async fn receive(&self) -> Option<ConsumerMessage> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let message = self.receiver.lock().await.recv().await;
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        message
    }

    async fn ack(&self, message: &ConsumerMessage) -> BrokerResult<()> {
        if let Some(id) = message.id {
            self.state.ack(&self.topic, &self.subscription, id);
        }
        Ok(())
    }

    async fn nack(&self, message: &ConsumerMessage) -> BrokerResult<()> {
        self.state.nack(&self.topic, &self.subscription, message);
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state
                .detach(&self.topic, &self.subscription, self.generation);
        }
    }
}
