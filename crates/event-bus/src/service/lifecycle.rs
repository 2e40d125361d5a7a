//! # Event Bus
//!
//! Owns the registries, the publisher and every running delivery loop for
//! one process. Construct it at service startup and call
//! [`EventBus::shutdown`] before exit.
//!
//! Nothing is provisioned eagerly: topics and subscriptions are resolved on
//! first publish or subscribe.
//!
//! ## Shutdown Order
//!
//! ```text
//! 1. refuse new subscribe calls
//! 2. for every subscription: stop receiving → drain handlers → close channel
//! 3. refuse new publish calls, wait for those in flight
//! 4. for every cached topic: flush
//! 5. clear caches and registrations
//! ```
//!
//! Consumers are drained before topics are flushed so that publishes made by
//! in-flight handlers are covered by the flush. Every resource is attempted
//! exactly once; individual failures are logged and reported, never raised.
//!
//! A subscribe reserves its name before touching the broker. A subscribe
//! still resolving when shutdown takes the table finds its reservation gone,
//! tears down what it opened and fails with `ShuttingDown`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::BusConfig;
use crate::domain::{BusError, EventDraft, MessageId, PublishOptions, SubscribeOptions};
use crate::ports::{
    BrokerGateway, DeliveryChannel, EventPublisher, EventSubscriber, SharedHandler,
    SubscriptionHandle,
};
use crate::service::delivery::{ActiveSubscription, DeliveryLoop};
use crate::service::filter::FilteredHandler;
use crate::service::publisher::Publisher;
use crate::service::{SubscriptionRegistry, TopicRegistry};

/// A handler bound to a subscription by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    pub topic: String,
    pub subscription: String,
    /// Allow-list, or `None` when every event type is delivered
    pub event_types: Option<Vec<String>>,
    pub registered_at: DateTime<Utc>,
}

/// Entry in the table of bound subscriptions.
#[derive(Debug)]
enum Binding {
    /// A subscribe call for this name is resolving
    Reserved,
    Running(ActiveSubscription),
}

/// What a shutdown managed to release.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub subscriptions_closed: usize,
    pub close_failures: Vec<String>,
    pub topics_flushed: usize,
    pub flush_failures: Vec<String>,
}

impl ShutdownReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.close_failures.is_empty() && self.flush_failures.is_empty()
    }
}

pub struct EventBus<G: BrokerGateway> {
    gateway: Arc<G>,
    config: BusConfig,
    topics: Arc<TopicRegistry<G>>,
    subscriptions: SubscriptionRegistry<G>,
    publisher: Publisher<G>,
    active: Mutex<HashMap<String, Binding>>,
    registrations: RwLock<Vec<HandlerRegistration>>,
    shutting_down: AtomicBool,
}

impl<G: BrokerGateway> EventBus<G> {
    pub fn new(gateway: Arc<G>, config: BusConfig) -> Self {
        let topics = Arc::new(TopicRegistry::new(gateway.clone(), config.provisioning));
        let subscriptions =
            SubscriptionRegistry::new(gateway.clone(), topics.clone(), config.provisioning);
        let publisher = Publisher::new(gateway.clone(), topics.clone(), config.service_name.clone());

        info!(
            service = %config.service_name,
            environment = ?config.environment,
            provisioning = ?config.provisioning,
            "Event bus created"
        );

        Self {
            gateway,
            config,
            topics,
            subscriptions,
            publisher,
            active: Mutex::new(HashMap::new()),
            registrations: RwLock::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn topics(&self) -> &TopicRegistry<G> {
        &self.topics
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry<G> {
        &self.subscriptions
    }

    /// Handlers currently bound, in registration order.
    pub fn registrations(&self) -> Vec<HandlerRegistration> {
        self.registrations.read().clone()
    }

    /// Names of subscriptions with a running delivery loop.
    pub fn active_subscriptions(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .active
            .lock()
            .iter()
            .filter(|(_, binding)| matches!(binding, Binding::Running(_)))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    async fn bind(
        &self,
        topic: &str,
        subscription: &str,
        handler: SharedHandler,
        options: SubscribeOptions,
        event_types: Option<Vec<String>>,
    ) -> Result<(), BusError> {
        {
            let mut active = self.active.lock();
            if self.is_shutting_down() {
                return Err(BusError::ShuttingDown);
            }
            if active.contains_key(subscription) {
                return Err(BusError::AlreadySubscribed(subscription.to_string()));
            }
            active.insert(subscription.to_string(), Binding::Reserved);
        }

        let max_concurrency = options
            .max_concurrency
            .unwrap_or(self.config.max_concurrency)
            .max(1);

        let opened = match self.open(topic, subscription, &options, max_concurrency).await {
            Ok(opened) => opened,
            Err(e) => {
                self.release_reservation(subscription);
                return Err(e);
            }
        };
        let (handle, channel) = opened;

        let handler = match &event_types {
            Some(allowed) => {
                FilteredHandler::new(subscription, allowed.iter().cloned(), handler).shared()
            }
            None => handler,
        };
        let running = DeliveryLoop::new(handle.clone(), channel, handler, max_concurrency).spawn();

        let refused = {
            let mut active = self.active.lock();
            let reserved = matches!(active.get(subscription), Some(Binding::Reserved));
            if reserved && !self.is_shutting_down() {
                active.insert(subscription.to_string(), Binding::Running(running));
                self.registrations.write().push(HandlerRegistration {
                    topic: topic.to_string(),
                    subscription: subscription.to_string(),
                    event_types: event_types.clone(),
                    registered_at: Utc::now(),
                });
                None
            } else {
                if reserved {
                    active.remove(subscription);
                }
                Some(running)
            }
        };
        if let Some(running) = refused {
            // Shutdown took the table while this subscribe was resolving
            running.stop().await;
            self.subscriptions.remove(subscription);
            if let Err(e) = self.close_subscription(&handle).await {
                warn!(subscription = %subscription, error = %e, "Failed to close refused subscription");
            }
            return Err(BusError::ShuttingDown);
        }

        info!(
            topic = %topic,
            subscription = %subscription,
            event_types = ?event_types,
            max_concurrency,
            "Handler registered"
        );
        Ok(())
    }

    async fn open(
        &self,
        topic: &str,
        subscription: &str,
        options: &SubscribeOptions,
        max_concurrency: usize,
    ) -> Result<(Arc<SubscriptionHandle>, DeliveryChannel), BusError> {
        let handle = self.subscriptions.resolve(topic, subscription, options).await?;
        let channel = self
            .gateway
            .open_delivery(&handle, max_concurrency)
            .await
            .map_err(|e| BusError::transport("open_delivery", e))?;
        Ok((handle, channel))
    }

    fn release_reservation(&self, subscription: &str) {
        let mut active = self.active.lock();
        if matches!(active.get(subscription), Some(Binding::Reserved)) {
            active.remove(subscription);
        }
    }

    /// Drain and close every subscription, then flush every topic.
    ///
    /// Only the first call does any work; later calls return an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        info!(service = %self.config.service_name, "Event bus shutting down");

        let mut report = ShutdownReport::default();

        let (closed, close_failures) = self.close_all().await;
        report.subscriptions_closed = closed;
        report.close_failures = close_failures;

        self.publisher.close().await;
        let flushed = self.publisher.flush_all().await;
        report.topics_flushed = flushed.flushed;
        report.flush_failures = flushed.failed;

        if report.is_clean() {
            info!(
                subscriptions_closed = report.subscriptions_closed,
                topics_flushed = report.topics_flushed,
                "Event bus shut down"
            );
        } else {
            warn!(
                subscriptions_closed = report.subscriptions_closed,
                close_failures = ?report.close_failures,
                topics_flushed = report.topics_flushed,
                flush_failures = ?report.flush_failures,
                "Event bus shut down with failures"
            );
        }
        report
    }

    async fn close_all(&self) -> (usize, Vec<String>) {
        let running: Vec<ActiveSubscription> = {
            let mut active = self.active.lock();
            self.registrations.write().clear();
            std::mem::take(&mut *active)
                .into_values()
                .filter_map(|binding| match binding {
                    Binding::Running(running) => Some(running),
                    Binding::Reserved => None,
                })
                .collect()
        };

        let mut handles = self.subscriptions.drain();
        for active in &running {
            if !handles.iter().any(|h| h.name() == active.handle().name()) {
                handles.push(active.handle().clone());
            }
        }

        // Drain all loops concurrently; each waits at most its ack deadline
        let mut draining = JoinSet::new();
        for active in running {
            draining.spawn(active.stop());
        }
        while let Some(result) = draining.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "Drain task failed");
            }
        }

        let mut closed = 0;
        let mut failures = Vec::new();
        for handle in handles {
            match self.close_subscription(&handle).await {
                Ok(()) => closed += 1,
                Err(e) => {
                    error!(subscription = %handle.name(), error = %e, "Failed to close subscription");
                    failures.push(handle.name().to_string());
                }
            }
        }
        (closed, failures)
    }

    async fn close_subscription(&self, handle: &SubscriptionHandle) -> Result<(), BusError> {
        self.gateway
            .close(handle)
            .await
            .map_err(|e| BusError::transport("close", e))
    }
}

#[async_trait]
impl<G: BrokerGateway> EventPublisher for EventBus<G> {
    async fn publish(
        &self,
        topic: &str,
        draft: EventDraft,
        options: PublishOptions,
    ) -> Result<MessageId, BusError> {
        self.publisher.publish(topic, draft, options).await
    }
}

#[async_trait]
impl<G: BrokerGateway> EventSubscriber for EventBus<G> {
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<(), BusError> {
        self.bind(topic, subscription, handler, options, None).await
    }

    async fn subscribe_to_events(
        &self,
        topic: &str,
        subscription: &str,
        event_types: Vec<String>,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<(), BusError> {
        self.bind(topic, subscription, handler, options, Some(event_types))
            .await
    }

    async fn unsubscribe(&self, subscription: &str) -> Result<(), BusError> {
        let running = {
            let mut active = self.active.lock();
            if matches!(active.get(subscription), Some(Binding::Reserved)) {
                // Still binding; nothing to detach yet
                return Ok(());
            }
            self.registrations
                .write()
                .retain(|r| r.subscription != subscription);
            match active.remove(subscription) {
                Some(Binding::Running(running)) => Some(running),
                _ => None,
            }
        };
        let cached = self.subscriptions.remove(subscription);

        let handle = match (running, cached) {
            (Some(active), cached) => {
                let handle = cached.unwrap_or_else(|| active.handle().clone());
                let drained = active.stop().await;
                info!(
                    subscription = %subscription,
                    completed = drained.completed,
                    abandoned = drained.abandoned,
                    "Handler detached"
                );
                handle
            }
            (None, Some(handle)) => handle,
            (None, None) => return Ok(()),
        };

        self.close_subscription(&handle).await
    }
}
