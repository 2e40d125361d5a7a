//! # Subscription Registry
//!
//! Resolves named subscriptions to live handles. When a subscription has to
//! be created, its topic and dead-letter topic are resolved first through the
//! [`TopicRegistry`], then the subscription is created with the standard
//! retry and dead-letter settings.

use std::collections::HashMap;
use std::sync::Arc;

use bus_telemetry::RESOURCES_PROVISIONED;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::{BusError, GatewayError, ProvisioningPolicy, SubscribeOptions, SubscriptionSettings};
use crate::ports::{BrokerGateway, SubscriptionHandle};
use crate::service::TopicRegistry;

pub struct SubscriptionRegistry<G: BrokerGateway> {
    gateway: Arc<G>,
    topics: Arc<TopicRegistry<G>>,
    policy: ProvisioningPolicy,
    subscriptions: RwLock<HashMap<String, Arc<SubscriptionHandle>>>,
}

impl<G: BrokerGateway> SubscriptionRegistry<G> {
    pub fn new(gateway: Arc<G>, topics: Arc<TopicRegistry<G>>, policy: ProvisioningPolicy) -> Self {
        Self {
            gateway,
            topics,
            policy,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `subscription` on `topic`, creating it if absent and the
    /// policy allows.
    pub async fn resolve(
        &self,
        topic: &str,
        subscription: &str,
        options: &SubscribeOptions,
    ) -> Result<Arc<SubscriptionHandle>, BusError> {
        if let Some(handle) = self.cached(subscription) {
            debug!(subscription = %subscription, "Subscription cache hit");
            return Ok(handle);
        }

        let exists = self
            .gateway
            .subscription_exists(subscription)
            .await
            .map_err(|e| BusError::transport("subscription_exists", e))?;

        if !exists {
            if !self.policy.allows_create() {
                return Err(BusError::SubscriptionNotFound(subscription.to_string()));
            }
            self.create(topic, subscription, options).await?;
        }

        let handle = self
            .gateway
            .subscription_handle(subscription)
            .await
            .map_err(|e| BusError::transport("subscription_handle", e))?;

        Ok(self.insert(subscription, handle))
    }

    async fn create(
        &self,
        topic: &str,
        subscription: &str,
        options: &SubscribeOptions,
    ) -> Result<(), BusError> {
        let settings = SubscriptionSettings::for_topic(topic, options);

        self.topics.resolve_with(topic, self.policy).await?;
        self.topics
            .resolve_with(&settings.dead_letter.topic, self.policy)
            .await?;

        match self
            .gateway
            .create_subscription(subscription, topic, &settings)
            .await
        {
            Ok(()) => {
                RESOURCES_PROVISIONED
                    .with_label_values(&["subscription"])
                    .inc();
                info!(
                    subscription = %subscription,
                    topic = %topic,
                    ack_deadline_secs = settings.ack_deadline.as_secs(),
                    dead_letter_topic = %settings.dead_letter.topic,
                    max_delivery_attempts = settings.dead_letter.max_delivery_attempts,
                    "Subscription created"
                );
                Ok(())
            }
            Err(GatewayError::AlreadyExists(_)) => {
                debug!(subscription = %subscription, "Subscription created concurrently");
                Ok(())
            }
            Err(e) => Err(BusError::transport("create_subscription", e)),
        }
    }

    fn cached(&self, name: &str) -> Option<Arc<SubscriptionHandle>> {
        self.subscriptions.read().get(name).cloned()
    }

    fn insert(&self, name: &str, handle: SubscriptionHandle) -> Arc<SubscriptionHandle> {
        self.subscriptions
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(handle))
            .clone()
    }

    /// Forget a cached subscription.
    pub fn remove(&self, name: &str) -> Option<Arc<SubscriptionHandle>> {
        self.subscriptions.write().remove(name)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Take every cached handle, leaving the cache empty.
    pub fn drain(&self) -> Vec<Arc<SubscriptionHandle>> {
        self.subscriptions
            .write()
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }
}
