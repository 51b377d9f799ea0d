//! Shared fixtures for connector integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use pulsar_connector::broker::in_memory::InMemoryBroker;
use pulsar_connector::config::{
    ConnectionSettings, PayloadFormat, ProcessingMode, RunnerSettings, RunnerType,
    SubscriptionSettings,
};
use pulsar_connector::connection::ConnectionHandle;
use pulsar_connector::context::{AppInfo, ConnectorContext};
use pulsar_connector::trigger::{
    HandlerAttributes, HandlerContext, MessageHandler, RetryPolicy, SubscriberOutput,
    TriggerCoordinator, NACK_ATTRIBUTE,
};

pub const BROKER_URL: &str = "pulsar://localhost:6650";

/// What a [`RecordingHandler`] does with each call
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail,
    RequestNack,
    /// Block until a permit is released on the semaphore
    Gated(Arc<Semaphore>),
}

/// Handler that records every call and tracks peak concurrency
pub struct RecordingHandler {
    name: String,
    behavior: Behavior,
    calls: Mutex<Vec<SubscriberOutput>>,
    contexts: Mutex<Vec<HandlerContext>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    started: AtomicUsize,
}

impl RecordingHandler {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            calls: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> Vec<SubscriberOutput> {
        self.calls.lock().clone()
    }

    pub fn contexts(&self) -> Vec<HandlerContext> {
        self.contexts.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        context: HandlerContext,
        output: SubscriberOutput,
    ) -> anyhow::Result<HandlerAttributes> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        self.contexts.lock().push(context);
        self.calls.lock().push(output);

        let result = match &self.behavior {
            Behavior::Succeed => Ok(HandlerAttributes::new()),
            Behavior::Fail => Err(anyhow::anyhow!("downstream unavailable")),
            Behavior::RequestNack => Ok(HandlerAttributes::from([(
                NACK_ATTRIBUTE.to_string(),
                serde_json::Value::Bool(true),
            )])),
            Behavior::Gated(gate) => {
                let permit = gate.acquire().await?;
                permit.forget();
                Ok(HandlerAttributes::new())
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub fn context() -> ConnectorContext {
    ConnectorContext::new(AppInfo {
        name: "it-app".to_string(),
        version: "0.9.0".to_string(),
    })
    .with_host_name("it-host")
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        connect_backoff: Duration::from_millis(20),
        receive_backoff: Duration::from_millis(20),
    }
}

pub fn connection(broker: &InMemoryBroker) -> Arc<ConnectionHandle> {
    Arc::new(
        ConnectionHandle::new(
            &ConnectionSettings::new(BROKER_URL),
            Arc::new(broker.clone()),
            &context(),
        )
        .expect("connection handle"),
    )
}

pub fn subscription(
    topic: &str,
    name: &str,
    mode: ProcessingMode,
    format: PayloadFormat,
) -> SubscriptionSettings {
    let mut settings = SubscriptionSettings::new(topic, name);
    settings.processing_mode = mode;
    settings.format = format;
    settings
}

pub fn pooled(workers: usize) -> RunnerSettings {
    RunnerSettings {
        runner_type: RunnerType::Pooled,
        workers,
    }
}

/// Coordinator with one subscription and fast retries
pub fn single_worker(
    broker: &InMemoryBroker,
    settings: SubscriptionSettings,
    handler: Arc<RecordingHandler>,
    runner: RunnerSettings,
) -> TriggerCoordinator {
    TriggerCoordinator::with_retry_policy(
        connection(broker),
        &context(),
        runner,
        vec![(settings, handler as Arc<dyn MessageHandler>)],
        fast_retry(),
    )
    .expect("coordinator")
}

/// Poll `condition` for up to five seconds
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}
