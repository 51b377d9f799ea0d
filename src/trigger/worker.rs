//! # Subscription Worker
//!
//! One worker per configured subscription. A run of the worker is a spawned
//! task that moves through:
//!
//! - **Connecting**: ask the [`ConnectionHandle`] for a consumer until it
//!   succeeds, waiting [`RetryPolicy::connect_backoff`] between attempts. Never
//!   gives up. A consumer retained from a pause is reused.
//! - **Consuming**: wait for a delivery or a stop request. Sync mode handles
//!   each delivery inline; async mode dispatches into an [`InFlightWindow`] and
//!   drains it completely whenever it fills. A closed delivery channel waits
//!   [`RetryPolicy::receive_backoff`] and tries again.
//!
//! Every wait is raced against the stop signal so shutdown is never stuck
//! behind a backoff. Handling already dispatched is not cancelled.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{requests_nack, HandlerContext, MessageHandler, SubscriberOutput};
use super::window::InFlightWindow;
use crate::broker::{Consumer, ConsumerMessage, ConsumerOptions};
use crate::config::SubscriptionSettings;
use crate::connection::ConnectionHandle;
use crate::context::ConnectorContext;
use crate::error::Result;

/// Backoffs for the connect and receive retry loops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub connect_backoff: Duration,
    pub receive_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_backoff: Duration::from_secs(60),
            receive_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Connecting,
    Consuming,
    Paused,
    Stopped,
}

/// Counters for worker observability
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub nacked: AtomicU64,
    pub decode_failures: AtomicU64,
    pub handler_failures: AtomicU64,
    pub connect_attempts: AtomicU64,
    /// Times the async window filled and blocked pulling until drained
    pub window_drains: AtomicU64,
}

impl WorkerStats {
    pub fn get_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    pub fn get_acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn get_nacked(&self) -> u64 {
        self.nacked.load(Ordering::Relaxed)
    }

    pub fn get_decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    pub fn get_handler_failures(&self) -> u64 {
        self.handler_failures.load(Ordering::Relaxed)
    }

    pub fn get_connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn get_window_drains(&self) -> u64 {
        self.window_drains.load(Ordering::Relaxed)
    }
}

struct RunHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct WorkerCore {
    settings: SubscriptionSettings,
    options: ConsumerOptions,
    handler_name: String,
    handler: Arc<dyn MessageHandler>,
    connection: Arc<ConnectionHandle>,
    consumer: Mutex<Option<Arc<dyn Consumer>>>,
    max_in_flight: usize,
    retry: RetryPolicy,
    stats: Arc<WorkerStats>,
    state: RwLock<WorkerState>,
}

pub struct SubscriptionWorker {
    core: Arc<WorkerCore>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
}

impl std::fmt::Debug for SubscriptionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionWorker")
            .field("topic", &self.core.settings.topic)
            .field("subscription", &self.core.settings.subscription)
            .field("consumer_name", &self.core.options.name)
            .field("state", &self.state())
            .finish()
    }
}

impl SubscriptionWorker {
    pub fn new(
        settings: SubscriptionSettings,
        handler: Arc<dyn MessageHandler>,
        connection: Arc<ConnectionHandle>,
        context: &ConnectorContext,
        max_in_flight: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        settings.validate()?;

        let handler_name = settings.handler_name(handler.name()).to_string();
        let options = settings.consumer_options(context.participant_name(&handler_name));

        Ok(Self {
            core: Arc::new(WorkerCore {
                settings,
                options,
                handler_name,
                handler,
                connection,
                consumer: Mutex::new(None),
                max_in_flight: max_in_flight.max(1),
                retry,
                stats: Arc::new(WorkerStats::default()),
                state: RwLock::new(WorkerState::Idle),
            }),
            run: tokio::sync::Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.core.settings
    }

    pub fn consumer_name(&self) -> &str {
        &self.core.options.name
    }

    pub fn max_in_flight(&self) -> usize {
        self.core.max_in_flight
    }

    pub fn state(&self) -> WorkerState {
        *self.core.state.read()
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        Arc::clone(&self.core.stats)
    }

    pub fn has_consumer(&self) -> bool {
        self.core.consumer.lock().is_some()
    }

    /// Launch the consume loop. A loop already running is stopped and awaited
    /// first so two loops never share the subscription.
    #[instrument(skip(self), fields(topic = %self.core.settings.topic, subscription = %self.core.settings.subscription))]
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        halt(run.take()).await;

        let (stop, signal) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let task = tokio::spawn(async move { core.run(signal).await });
        *run = Some(RunHandle { stop, task });

        info!(
            consumer = %self.core.options.name,
            mode = ?self.core.settings.processing_mode,
            max_in_flight = self.core.max_in_flight,
            "Subscription worker started"
        );
    }

    /// Stop the loop and close the consumer. Safe when never connected.
    #[instrument(skip(self), fields(topic = %self.core.settings.topic, subscription = %self.core.settings.subscription))]
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        halt(run.take()).await;

        let consumer = self.core.consumer.lock().take();
        if let Some(consumer) = consumer {
            consumer.close().await;
            info!("Consumer closed");
        }
        self.core.set_state(WorkerState::Stopped);
    }

    /// Stop the loop but keep the consumer for a later [`start`](Self::start)
    #[instrument(skip(self), fields(topic = %self.core.settings.topic, subscription = %self.core.settings.subscription))]
    pub async fn pause(&self) {
        let mut run = self.run.lock().await;
        halt(run.take()).await;
        self.core.set_state(WorkerState::Paused);
        info!("Subscription worker paused");
    }
}

async fn halt(run: Option<RunHandle>) {
    let Some(run) = run else {
        return;
    };
    // The loop may already have exited and dropped its receiver
    let _ = run.stop.send(true);
    if let Err(e) = run.task.await {
        error!(error = %e, "Consume loop terminated abnormally");
    }
}

/// Resolves once a stop is requested or the requester is gone
async fn stop_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

impl WorkerCore {
    fn set_state(&self, state: WorkerState) {
        *self.state.write() = state;
    }

    async fn run(self: Arc<Self>, mut signal: watch::Receiver<bool>) {
        let Some(consumer) = self.acquire_consumer(&mut signal).await else {
            debug!("Stop requested while connecting");
            return;
        };

        self.set_state(WorkerState::Consuming);
        info!(topic = %self.settings.topic, subscription = %self.settings.subscription, "Consuming");

        let mut window = InFlightWindow::new(self.max_in_flight);
        loop {
            if window.is_full() {
                self.stats.window_drains.fetch_add(1, Ordering::Relaxed);
                tokio::select! {
                    biased;
                    _ = stop_requested(&mut signal) => break,
                    _ = window.drain() => {}
                }
            }

            let delivery = tokio::select! {
                biased;
                _ = stop_requested(&mut signal) => break,
                delivery = consumer.receive() => delivery,
            };

            let message = match delivery {
                Some(message) => message,
                None => {
                    warn!(
                        subscription = %self.settings.subscription,
                        retry_in = ?self.retry.receive_backoff,
                        "Delivery channel closed; waiting before retry"
                    );
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut signal) => break,
                        _ = tokio::time::sleep(self.retry.receive_backoff) => {}
                    }
                    continue;
                }
            };

            self.stats.received.fetch_add(1, Ordering::Relaxed);

            if self.settings.processing_mode.is_async() {
                let core = Arc::clone(&self);
                let consumer = Arc::clone(&consumer);
                window.dispatch(async move { core.handle(consumer.as_ref(), message).await });
            } else {
                self.handle(consumer.as_ref(), message).await;
            }
        }

        debug!(
            in_flight = window.in_flight(),
            "Consume loop exited; dispatched handling continues"
        );
    }

    async fn acquire_consumer(
        &self,
        signal: &mut watch::Receiver<bool>,
    ) -> Option<Arc<dyn Consumer>> {
        self.set_state(WorkerState::Connecting);

        let retained = self.consumer.lock().clone();
        if let Some(consumer) = retained {
            debug!("Reusing retained consumer");
            return Some(consumer);
        }

        loop {
            let attempt = self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            match self.connection.consumer(self.options.clone()).await {
                Ok(consumer) => {
                    info!(
                        topic = %self.settings.topic,
                        subscription = %self.settings.subscription,
                        consumer = %self.options.name,
                        attempt,
                        "Subscribed"
                    );
                    *self.consumer.lock() = Some(Arc::clone(&consumer));
                    return Some(consumer);
                }
                Err(e) => {
                    warn!(
                        topic = %self.settings.topic,
                        subscription = %self.settings.subscription,
                        attempt,
                        error = %e,
                        retry_in = ?self.retry.connect_backoff,
                        "Failed to subscribe; retrying"
                    );
                }
            }

            tokio::select! {
                biased;
                _ = stop_requested(signal) => return None,
                _ = tokio::time::sleep(self.retry.connect_backoff) => {}
            }
        }
    }

    #[instrument(skip_all, fields(subscription = %self.settings.subscription, msgid = ?message.id))]
    async fn handle(&self, consumer: &dyn Consumer, message: ConsumerMessage) {
        let output = match SubscriberOutput::from_message(&message, self.settings.format) {
            Ok(output) => output,
            Err(e) => {
                self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Payload could not be decoded; negative acknowledging");
                self.nack(consumer, &message).await;
                return;
            }
        };

        let context = HandlerContext::for_delivery(&self.handler_name, &output);
        let outcome = AssertUnwindSafe(self.handler.handle(context, output))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(attributes)) if requests_nack(&attributes) => {
                debug!("Handler requested negative acknowledgement");
                self.nack(consumer, &message).await;
            }
            Ok(Ok(_)) => self.ack(consumer, &message).await,
            Ok(Err(e)) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(handler = %self.handler_name, error = %e, "Handler failed; negative acknowledging");
                self.nack(consumer, &message).await;
            }
            Err(_) => {
                self.stats.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(handler = %self.handler_name, "Handler panicked; negative acknowledging");
                self.nack(consumer, &message).await;
            }
        }
    }

    async fn ack(&self, consumer: &dyn Consumer, message: &ConsumerMessage) {
        match consumer.ack(message).await {
            Ok(()) => {
                self.stats.acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!(error = %e, "Failed to acknowledge message"),
        }
    }

    async fn nack(&self, consumer: &dyn Consumer, message: &ConsumerMessage) {
        match consumer.nack(message).await {
            Ok(()) => {
                self.stats.nacked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!(error = %e, "Failed to negative acknowledge message"),
        }
    }
}
