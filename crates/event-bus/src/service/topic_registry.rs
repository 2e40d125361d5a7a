//! # Topic Registry
//!
//! Resolves logical topic names to live handles, provisioning on demand when
//! the policy allows, and caches handles until [`TopicRegistry::drain`].
//! A drained registry stays sealed: later resolves still return handles but
//! no longer cache them, so nothing lands in the cache after shutdown
//! flushed it.
//!
//! Concurrent misses for the same name may each try to create the topic.
//! That is tolerated: an `AlreadyExists` outcome counts as success and the
//! first handle inserted into the cache wins.

use std::collections::HashMap;
use std::sync::Arc;

use bus_telemetry::RESOURCES_PROVISIONED;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::domain::{BusError, GatewayError, ProvisioningPolicy};
use crate::ports::{BrokerGateway, TopicHandle};

#[derive(Default)]
struct TopicCache {
    handles: HashMap<String, Arc<TopicHandle>>,
    sealed: bool,
}

pub struct TopicRegistry<G: BrokerGateway> {
    gateway: Arc<G>,
    policy: ProvisioningPolicy,
    topics: RwLock<TopicCache>,
}

impl<G: BrokerGateway> TopicRegistry<G> {
    pub fn new(gateway: Arc<G>, policy: ProvisioningPolicy) -> Self {
        Self {
            gateway,
            policy,
            topics: RwLock::new(TopicCache::default()),
        }
    }

    pub fn policy(&self) -> ProvisioningPolicy {
        self.policy
    }

    /// Resolve a topic, creating it if absent and the policy allows.
    pub async fn resolve(&self, name: &str) -> Result<Arc<TopicHandle>, BusError> {
        self.resolve_with(name, self.policy).await
    }

    /// Resolve with an explicit policy (used for dead-letter topics, which
    /// follow the policy of the subscription that references them).
    pub(crate) async fn resolve_with(
        &self,
        name: &str,
        policy: ProvisioningPolicy,
    ) -> Result<Arc<TopicHandle>, BusError> {
        if let Some(handle) = self.cached(name) {
            debug!(topic = %name, "Topic cache hit");
            return Ok(handle);
        }

        let exists = self
            .gateway
            .topic_exists(name)
            .await
            .map_err(|e| BusError::transport("topic_exists", e))?;

        if !exists {
            if !policy.allows_create() {
                return Err(BusError::TopicNotFound(name.to_string()));
            }
            self.create(name).await?;
        }

        let handle = self
            .gateway
            .topic_handle(name)
            .await
            .map_err(|e| BusError::transport("topic_handle", e))?;

        Ok(self.insert(name, handle))
    }

    async fn create(&self, name: &str) -> Result<(), BusError> {
        match self.gateway.create_topic(name).await {
            Ok(()) => {
                RESOURCES_PROVISIONED.with_label_values(&["topic"]).inc();
                info!(topic = %name, "Topic created");
                Ok(())
            }
            Err(GatewayError::AlreadyExists(_)) => {
                debug!(topic = %name, "Topic created concurrently");
                Ok(())
            }
            Err(e) => Err(BusError::transport("create_topic", e)),
        }
    }

    fn cached(&self, name: &str) -> Option<Arc<TopicHandle>> {
        self.topics.read().handles.get(name).cloned()
    }

    fn insert(&self, name: &str, handle: TopicHandle) -> Arc<TopicHandle> {
        let mut cache = self.topics.write();
        if cache.sealed {
            debug!(topic = %name, "Registry drained; handle not cached");
            return Arc::new(handle);
        }
        cache
            .handles
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(handle))
            .clone()
    }

    /// Names of all cached topics.
    pub fn cached_names(&self) -> Vec<String> {
        self.topics.read().handles.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.topics.read().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().handles.is_empty()
    }

    /// Take every cached handle and seal the cache.
    pub fn drain(&self) -> Vec<Arc<TopicHandle>> {
        let mut cache = self.topics.write();
        cache.sealed = true;
        cache.handles.drain().map(|(_, handle)| handle).collect()
    }
}
