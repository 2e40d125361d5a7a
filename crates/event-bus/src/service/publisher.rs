//! # Publish Engine
//!
//! ```text
//! publish(topic, draft, options)
//!   1. resolve topic            (TopicRegistry)
//!   2. materialize envelope     (eventId, timestamp, version, source)
//!   3. mint metadata            (correlationId, traceId)
//!   4. encode + merge attributes (caller overrides win)
//!   5. broker publish           (optional ordering key)
//!   6. return broker message id
//! ```
//!
//! Provisioning and transport failures are returned unchanged; retrying a
//! publish is the caller's decision.
//!
//! Each publish holds a read guard on the close gate from the closed check
//! until the broker answers. [`Publisher::close`] takes the write guard, so
//! it returns only once every publish already admitted has finished, and the
//! flush that follows covers them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bus_telemetry::{MESSAGES_PUBLISHED, PUBLISH_FAILURES};
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use crate::domain::{
    codec, BusError, EnvelopeMetadata, EventDraft, MessageId, PublishOptions,
};
use crate::ports::{BrokerGateway, EventPublisher, OutboundMessage};
use crate::service::TopicRegistry;

/// Flush outcome for a set of topics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: Vec<String>,
}

pub struct Publisher<G: BrokerGateway> {
    gateway: Arc<G>,
    topics: Arc<TopicRegistry<G>>,
    service_name: String,
    gate: RwLock<()>,
    closed: AtomicBool,
}

impl<G: BrokerGateway> Publisher<G> {
    pub fn new(gateway: Arc<G>, topics: Arc<TopicRegistry<G>>, service_name: impl Into<String>) -> Self {
        Self {
            gateway,
            topics,
            service_name: service_name.into(),
            gate: RwLock::new(()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    async fn publish_inner(
        &self,
        topic: &str,
        draft: EventDraft,
        options: PublishOptions,
    ) -> Result<MessageId, BusError> {
        let _admitted = self.gate.read().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::ShuttingDown);
        }

        let handle = self.topics.resolve(topic).await?;

        let envelope = draft.materialize(&self.service_name);
        let metadata = EnvelopeMetadata::generate();
        let (message, encoded) = codec::encode_parts(envelope, metadata)?;

        let mut attributes = encoded.attributes;
        attributes.extend(options.attributes);

        let message_id = self
            .gateway
            .publish(
                &handle,
                OutboundMessage {
                    data: encoded.data,
                    attributes,
                    ordering_key: options.ordering_key,
                },
            )
            .await
            .map_err(|e| BusError::transport("publish", e))?;

        MESSAGES_PUBLISHED
            .with_label_values(&[topic, &message.data.event_type])
            .inc();
        debug!(
            topic = %topic,
            message_id = %message_id,
            event_id = %message.data.event_id,
            event_type = %message.data.event_type,
            correlation_id = %message.metadata.correlation_id,
            "Event published"
        );

        Ok(message_id)
    }

    /// Refuse further publishes and wait for those in flight.
    pub async fn close(&self) {
        let _exclusive = self.gate.write().await;
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flush every cached topic and clear the cache.
    ///
    /// Each topic is attempted exactly once; a failure is logged and does not
    /// stop the remaining flushes.
    pub async fn flush_all(&self) -> FlushReport {
        let mut report = FlushReport::default();

        for handle in self.topics.drain() {
            match self.gateway.flush(&handle).await {
                Ok(()) => {
                    debug!(topic = %handle.name(), "Topic flushed");
                    report.flushed += 1;
                }
                Err(e) => {
                    error!(topic = %handle.name(), error = %e, "Failed to flush topic");
                    report.failed.push(handle.name().to_string());
                }
            }
        }

        report
    }
}

#[async_trait]
impl<G: BrokerGateway> EventPublisher for Publisher<G> {
    async fn publish(
        &self,
        topic: &str,
        draft: EventDraft,
        options: PublishOptions,
    ) -> Result<MessageId, BusError> {
        let result = self.publish_inner(topic, draft, options).await;
        if let Err(e) = &result {
            PUBLISH_FAILURES.with_label_values(&[topic]).inc();
            warn!(topic = %topic, error = %e, "Publish failed");
        }
        result
    }
}
