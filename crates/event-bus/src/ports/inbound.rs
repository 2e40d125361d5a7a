//! Inbound (Driving) ports for the event bus.
//!
//! These traits are the API that services use: they publish through
//! [`EventPublisher`], register consumers through [`EventSubscriber`], and
//! implement [`EventHandler`] for their consumer callbacks.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    BusError, EnvelopeMetadata, EventDraft, EventEnvelope, HandlerError, MessageId,
    PublishOptions, SubscribeOptions,
};

/// A decoded message handed to a consumer.
#[derive(Debug, Clone)]
pub struct ReceivedEvent {
    pub message_id: MessageId,
    pub envelope: EventEnvelope,
    pub metadata: EnvelopeMetadata,
    pub published_at: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
    /// 1-based broker delivery attempt. Informational only.
    pub delivery_attempt: u32,
}

impl ReceivedEvent {
    pub fn event_type(&self) -> &str {
        &self.envelope.event_type
    }

    /// Deserialize the payload into a typed shape.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.envelope.payload)
    }
}

/// Consumer callback.
///
/// `Ok(())` acknowledges the message. An error (or a panic) rejects it and
/// the broker redelivers according to the subscription's retry policy.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: ReceivedEvent) -> Result<(), HandlerError>;

    /// Whether events of `event_type` reach [`EventHandler::handle`].
    /// Delivery acknowledges refused events without invoking the handler.
    fn accepts(&self, _event_type: &str) -> bool {
        true
    }
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(ReceivedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: ReceivedEvent) -> Result<(), HandlerError> {
        (self)(event).await
    }
}

/// Shared, type-erased handler.
pub type SharedHandler = Arc<dyn EventHandler>;

/// Publishing side of the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event, returning the broker-issued message id.
    async fn publish(
        &self,
        topic: &str,
        draft: EventDraft,
        options: PublishOptions,
    ) -> Result<MessageId, BusError>;

    /// Publish events in order; the first failure aborts the rest.
    async fn publish_batch(
        &self,
        topic: &str,
        drafts: Vec<EventDraft>,
    ) -> Result<Vec<MessageId>, BusError> {
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in drafts {
            ids.push(self.publish(topic, draft, PublishOptions::default()).await?);
        }
        Ok(ids)
    }
}

/// Consuming side of the bus.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Bind `handler` to `subscription` on `topic`.
    async fn subscribe(
        &self,
        topic: &str,
        subscription: &str,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<(), BusError>;

    /// Like [`subscribe`](Self::subscribe), but only events whose type is in
    /// `event_types` reach the handler; all others are acknowledged unseen.
    async fn subscribe_to_events(
        &self,
        topic: &str,
        subscription: &str,
        event_types: Vec<String>,
        handler: SharedHandler,
        options: SubscribeOptions,
    ) -> Result<(), BusError>;

    /// Detach the handler and close the delivery channel. Idempotent.
    async fn unsubscribe(&self, subscription: &str) -> Result<(), BusError>;
}
