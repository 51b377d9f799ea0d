//! # Subscription Trigger
//!
//! [`TriggerCoordinator`] owns one [`SubscriptionWorker`] per configured
//! subscription and drives them as a group through the host runtime's
//! lifecycle hooks.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use pulsar_connector::broker::in_memory::InMemoryBroker;
//! use pulsar_connector::config::{ConnectionSettings, RunnerSettings, SubscriptionSettings};
//! use pulsar_connector::connection::ConnectionHandle;
//! use pulsar_connector::context::{AppInfo, ConnectorContext};
//! use pulsar_connector::trigger::{
//!     HandlerAttributes, HandlerContext, MessageHandler, SubscriberOutput, TriggerCoordinator,
//! };
//!
//! struct PrintHandler;
//!
//! #[async_trait]
//! impl MessageHandler for PrintHandler {
//!     fn name(&self) -> &str {
//!         "print"
//!     }
//!
//!     async fn handle(
//!         &self,
//!         _context: HandlerContext,
//!         output: SubscriberOutput,
//!     ) -> anyhow::Result<HandlerAttributes> {
//!         println!("{}", output.payload);
//!         Ok(HandlerAttributes::new())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = ConnectorContext::new(AppInfo::default());
//! let connection = ConnectionHandle::establish(
//!     &ConnectionSettings::new("pulsar://localhost:6650"),
//!     Arc::new(InMemoryBroker::new()),
//!     &context,
//! )
//! .await?;
//!
//! let coordinator = TriggerCoordinator::new(
//!     connection,
//!     &context,
//!     RunnerSettings::default(),
//!     vec![(
//!         SubscriptionSettings::new("persistent://public/default/orders", "print"),
//!         Arc::new(PrintHandler) as Arc<dyn MessageHandler>,
//!     )],
//! )?;
//!
//! coordinator.start().await;
//! coordinator.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod handler;
pub mod window;
pub mod worker;

use std::sync::Arc;

use futures::future::join_all;
use tracing::info;

use crate::config::{RunnerSettings, SubscriptionSettings};
use crate::connection::ConnectionHandle;
use crate::context::ConnectorContext;
use crate::error::Result;

pub use handler::{
    HandlerAttributes, HandlerContext, MessageHandler, SubscriberOutput, LEGACY_NACK_ATTRIBUTE,
    NACK_ATTRIBUTE,
};
pub use window::InFlightWindow;
pub use worker::{RetryPolicy, SubscriptionWorker, WorkerState, WorkerStats};

#[derive(Debug)]
pub struct TriggerCoordinator {
    connection: Arc<ConnectionHandle>,
    workers: Vec<SubscriptionWorker>,
}

impl TriggerCoordinator {
    pub fn new(
        connection: Arc<ConnectionHandle>,
        context: &ConnectorContext,
        runner: RunnerSettings,
        subscriptions: Vec<(SubscriptionSettings, Arc<dyn MessageHandler>)>,
    ) -> Result<Self> {
        Self::with_retry_policy(
            connection,
            context,
            runner,
            subscriptions,
            RetryPolicy::default(),
        )
    }

    /// Build every worker up front; any invalid subscription fails the whole coordinator
    pub fn with_retry_policy(
        connection: Arc<ConnectionHandle>,
        context: &ConnectorContext,
        runner: RunnerSettings,
        subscriptions: Vec<(SubscriptionSettings, Arc<dyn MessageHandler>)>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let max_in_flight = runner.max_in_flight();
        let workers = subscriptions
            .into_iter()
            .map(|(settings, handler)| {
                SubscriptionWorker::new(
                    settings,
                    handler,
                    Arc::clone(&connection),
                    context,
                    max_in_flight,
                    retry,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            connection,
            workers,
        })
    }

    pub fn workers(&self) -> &[SubscriptionWorker] {
        &self.workers
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    /// Launch every worker; returns without waiting for them to connect
    pub async fn start(&self) {
        join_all(self.workers.iter().map(SubscriptionWorker::start)).await;
        info!(workers = self.workers.len(), "Trigger started");
    }

    pub async fn stop(&self) {
        join_all(self.workers.iter().map(SubscriptionWorker::stop)).await;
        info!(workers = self.workers.len(), "Trigger stopped");
    }

    /// Stop consuming but keep consumers open for [`resume`](Self::resume)
    pub async fn pause(&self) {
        join_all(self.workers.iter().map(SubscriptionWorker::pause)).await;
        info!(workers = self.workers.len(), "Trigger paused");
    }

    pub async fn resume(&self) {
        self.start().await;
    }

    /// Stop every worker, then close the broker client and remove staged credentials
    pub async fn shutdown(&self) -> Result<()> {
        self.stop().await;
        self.connection.release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::in_memory::InMemoryBroker;
    use crate::config::{ConnectionSettings, RunnerType};
    use crate::context::AppInfo;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl MessageHandler for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        async fn handle(
            &self,
            _context: HandlerContext,
            _output: SubscriberOutput,
        ) -> anyhow::Result<HandlerAttributes> {
            Ok(HandlerAttributes::new())
        }
    }

    fn connection(broker: &InMemoryBroker, context: &ConnectorContext) -> Arc<ConnectionHandle> {
        Arc::new(
            ConnectionHandle::new(
                &ConnectionSettings::new("pulsar://localhost:6650"),
                Arc::new(broker.clone()),
                context,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_invalid_subscription_fails_construction() {
        let broker = InMemoryBroker::new();
        let context = ConnectorContext::new(AppInfo::default());
        let result = TriggerCoordinator::new(
            connection(&broker, &context),
            &context,
            RunnerSettings::default(),
            vec![(
                SubscriptionSettings::new("orders", ""),
                Arc::new(Noop) as Arc<dyn MessageHandler>,
            )],
        );
        assert!(result.unwrap_err().is_configuration());
    }

    #[test]
    fn test_runner_sets_worker_in_flight_cap() {
        let broker = InMemoryBroker::new();
        let context = ConnectorContext::new(AppInfo::default());
        let runner = RunnerSettings {
            runner_type: RunnerType::Pooled,
            workers: 3,
        };
        let coordinator = TriggerCoordinator::new(
            connection(&broker, &context),
            &context,
            runner,
            vec![
                (
                    SubscriptionSettings::new("orders", "a"),
                    Arc::new(Noop) as Arc<dyn MessageHandler>,
                ),
                (
                    SubscriptionSettings::new("refunds", "b"),
                    Arc::new(Noop) as Arc<dyn MessageHandler>,
                ),
            ],
        )
        .unwrap();

        assert_eq!(coordinator.workers().len(), 2);
        assert!(coordinator.workers().iter().all(|w| w.max_in_flight() == 3));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_harmless() {
        let broker = InMemoryBroker::new();
        let context = ConnectorContext::new(AppInfo::default());
        let coordinator = TriggerCoordinator::new(
            connection(&broker, &context),
            &context,
            RunnerSettings::default(),
            vec![(
                SubscriptionSettings::new("orders", "a"),
                Arc::new(Noop) as Arc<dyn MessageHandler>,
            )],
        )
        .unwrap();

        coordinator.stop().await;
        coordinator.stop().await;
        assert_eq!(coordinator.workers()[0].state(), WorkerState::Stopped);
        assert_eq!(broker.subscribe_attempts(), 0);
    }
}
