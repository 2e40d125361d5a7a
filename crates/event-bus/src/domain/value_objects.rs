//! Value objects shared by the registries, publisher and delivery loop.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default acknowledgment deadline for new subscriptions.
pub const DEFAULT_ACK_DEADLINE: Duration = Duration::from_secs(30);

/// Retention of unacknowledged messages on new subscriptions (7 days).
pub const MESSAGE_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Lower retry backoff bound on new subscriptions.
pub const MIN_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Upper retry backoff bound on new subscriptions.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(600);

/// Delivery attempts before the broker diverts a message to the dead-letter topic.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// Suffix appended to a topic name to form its dead-letter topic.
pub const DEAD_LETTER_SUFFIX: &str = "-dlq";

/// Whether registries may create missing topics and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProvisioningPolicy {
    /// Missing resources are an error; they are provisioned out-of-band.
    RequireExisting,
    /// Missing resources are created on first use.
    #[default]
    AutoProvision,
}

impl ProvisioningPolicy {
    #[must_use]
    pub fn allows_create(self) -> bool {
        matches!(self, Self::AutoProvision)
    }
}

/// Name of the dead-letter topic for `topic`.
pub fn dead_letter_topic(topic: &str) -> String {
    format!("{}{}", topic, DEAD_LETTER_SUFFIX)
}

/// Redelivery backoff bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub min: Duration,
    pub max: Duration,
}

impl RetryBackoff {
    /// Exponential delay before delivery attempt `attempt + 1`, clamped to the bounds.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.min.saturating_mul(factor).min(self.max).max(self.min)
    }
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self {
            min: MIN_RETRY_BACKOFF,
            max: MAX_RETRY_BACKOFF,
        }
    }
}

/// Where undeliverable messages go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub topic: String,
    pub max_delivery_attempts: u32,
}

/// Configuration applied when a subscription is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSettings {
    pub ack_deadline: Duration,
    pub retention: Duration,
    pub retry_backoff: RetryBackoff,
    pub dead_letter: DeadLetterPolicy,
}

impl SubscriptionSettings {
    /// Standard settings for a subscription on `topic`.
    pub fn for_topic(topic: &str, options: &SubscribeOptions) -> Self {
        Self {
            ack_deadline: options.ack_deadline.unwrap_or(DEFAULT_ACK_DEADLINE),
            retention: MESSAGE_RETENTION,
            retry_backoff: RetryBackoff::default(),
            dead_letter: DeadLetterPolicy {
                topic: dead_letter_topic(topic),
                max_delivery_attempts: MAX_DELIVERY_ATTEMPTS,
            },
        }
    }
}

/// Per-call publish options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Messages sharing a key are delivered to a subscription in publish order.
    pub ordering_key: Option<String>,
    /// Extra attributes; these win over the standard ones on conflict.
    pub attributes: BTreeMap<String, String>,
}

impl PublishOptions {
    pub fn ordered_by(key: impl Into<String>) -> Self {
        Self {
            ordering_key: Some(key.into()),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Per-call subscribe options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Ack deadline used if the subscription has to be created.
    pub ack_deadline: Option<Duration>,
    /// Maximum handlers running at once for this subscription.
    pub max_concurrency: Option<usize>,
}

impl SubscribeOptions {
    pub fn with_ack_deadline(mut self, deadline: Duration) -> Self {
        self.ack_deadline = Some(deadline);
        self
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }
}

/// Broker-issued message identifier.
pub type MessageId = String;

/// Settlement of one delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckReply {
    Ack,
    Nack,
}
