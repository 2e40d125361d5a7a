//! Event bus error types.
//!
//! | Family | Variants | Handling |
//! |--------|----------|----------|
//! | Provisioning | `TopicNotFound`, `SubscriptionNotFound` | Returned to the caller, never retried |
//! | Transport | `Transport` | Returned to publish/resolve callers, logged during drain |
//! | Malformed message | [`MalformedReason`](super::codec::MalformedReason) | Acknowledged and dropped |
//! | Handler failure | [`HandlerError`] | Negative-acknowledged, broker redelivers |

use thiserror::Error;

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// Topic is absent and the provisioning policy forbids creating it.
    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    /// Subscription is absent and the provisioning policy forbids creating it.
    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// A broker call failed.
    #[error("Broker call {operation} failed: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: GatewayError,
    },

    /// The envelope could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// This process already runs a delivery loop for the subscription.
    #[error("Subscription {0} already has an active handler")]
    AlreadySubscribed(String),

    /// Shutdown has begun.
    #[error("Event bus is shutting down")]
    ShuttingDown,
}

impl BusError {
    pub(crate) fn transport(operation: &'static str, source: GatewayError) -> Self {
        Self::Transport { operation, source }
    }

    /// Whether this is a missing-resource error in a require-existing environment.
    #[must_use]
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::TopicNotFound(_) | Self::SubscriptionNotFound(_))
    }
}

/// Errors reported by a broker gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Create call for a resource that already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The named resource does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The resource was closed.
    #[error("Resource closed: {0}")]
    Closed(String),
}

/// Error returned by a consumer handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
