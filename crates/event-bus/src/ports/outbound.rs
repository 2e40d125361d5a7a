//! Outbound (Driven) ports for the event bus.
//!
//! [`BrokerGateway`] is the contract the managed broker client must fulfil.
//! The engine never talks to the network except through it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{AckReply, GatewayError, MessageId, SubscriptionSettings, DEFAULT_ACK_DEADLINE};

/// Live handle to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicHandle {
    name: Arc<str>,
}

impl TopicHandle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Live handle to a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    name: Arc<str>,
    topic: Arc<str>,
    ack_deadline: Duration,
}

impl SubscriptionHandle {
    pub fn new(name: impl Into<Arc<str>>, topic: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            ack_deadline: DEFAULT_ACK_DEADLINE,
        }
    }

    /// Ack deadline the broker enforces on this subscription.
    #[must_use]
    pub fn with_ack_deadline(mut self, ack_deadline: Duration) -> Self {
        self.ack_deadline = ack_deadline;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn ack_deadline(&self) -> Duration {
        self.ack_deadline
    }
}

/// A message ready to hand to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub ordering_key: Option<String>,
}

/// One message delivered to this process.
///
/// Owns the reply slot for the message: [`Delivery::settle`] consumes the
/// delivery, so a message is acknowledged or rejected exactly once. Dropping
/// an unsettled delivery counts as a rejection.
#[derive(Debug)]
pub struct Delivery {
    message_id: MessageId,
    data: Vec<u8>,
    attributes: BTreeMap<String, String>,
    delivery_attempt: u32,
    reply: oneshot::Sender<AckReply>,
}

impl Delivery {
    /// Build a delivery and the receiver its settlement arrives on.
    pub fn new(
        message_id: impl Into<MessageId>,
        data: Vec<u8>,
        attributes: BTreeMap<String, String>,
        delivery_attempt: u32,
    ) -> (Self, oneshot::Receiver<AckReply>) {
        let (reply, settled) = oneshot::channel();
        let delivery = Self {
            message_id: message_id.into(),
            data,
            attributes,
            delivery_attempt,
            reply,
        };
        (delivery, settled)
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// 1-based attempt counter maintained by the broker.
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    /// Acknowledge or reject the message.
    pub fn settle(self, reply: AckReply) {
        // The broker may have given up on the message already (ack deadline)
        let _ = self.reply.send(reply);
    }
}

/// Stream of deliveries for one subscription.
///
/// The broker leases at most the `max_outstanding` passed to
/// [`BrokerGateway::open_delivery`] at a time, so the channel never holds
/// more than that.
#[derive(Debug)]
pub struct DeliveryChannel {
    receiver: mpsc::Receiver<Delivery>,
}

impl DeliveryChannel {
    pub fn new(receiver: mpsc::Receiver<Delivery>) -> Self {
        Self { receiver }
    }

    /// Next delivery, or `None` once the broker closed the channel.
    pub async fn next(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Stop accepting deliveries; anything still queued is dropped (rejected).
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Client-side contract of the managed broker.
#[async_trait]
pub trait BrokerGateway: Send + Sync + 'static {
    /// Whether a topic exists.
    async fn topic_exists(&self, name: &str) -> Result<bool, GatewayError>;

    /// Create a topic. May return [`GatewayError::AlreadyExists`].
    async fn create_topic(&self, name: &str) -> Result<(), GatewayError>;

    /// Handle to an existing topic.
    async fn topic_handle(&self, name: &str) -> Result<TopicHandle, GatewayError>;

    /// Publish one message, returning the broker-issued id.
    async fn publish(
        &self,
        topic: &TopicHandle,
        message: OutboundMessage,
    ) -> Result<MessageId, GatewayError>;

    /// Block until everything published to `topic` is acknowledged by the broker.
    async fn flush(&self, topic: &TopicHandle) -> Result<(), GatewayError>;

    /// Whether a subscription exists.
    async fn subscription_exists(&self, name: &str) -> Result<bool, GatewayError>;

    /// Create a subscription on `topic`. May return [`GatewayError::AlreadyExists`].
    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        settings: &SubscriptionSettings,
    ) -> Result<(), GatewayError>;

    /// Handle to an existing subscription, carrying its ack deadline.
    async fn subscription_handle(&self, name: &str) -> Result<SubscriptionHandle, GatewayError>;

    /// Start delivering messages for a subscription.
    ///
    /// No more than `max_outstanding` messages are leased to the channel
    /// before earlier ones settle. A message's ack deadline starts when it
    /// is leased.
    async fn open_delivery(
        &self,
        subscription: &SubscriptionHandle,
        max_outstanding: usize,
    ) -> Result<DeliveryChannel, GatewayError>;

    /// Stop delivering messages for a subscription.
    async fn close(&self, subscription: &SubscriptionHandle) -> Result<(), GatewayError>;
}
