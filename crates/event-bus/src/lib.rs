//! # Event Bus - Envelope Protocol and Delivery Engine
//!
//! Client side of a managed topic broker: every service publishes and
//! consumes domain events through one [`EventBus`].
//!
//! ## Message Flow
//!
//! ```text
//! ┌──────────────┐  publish()   ┌──────────────┐   push    ┌──────────────┐
//! │  Producer    │ ───────────▶ │    Topic     │ ────────▶ │ Subscription │
//! │  Service     │   envelope   │  (broker)    │  fan-out  │  (broker)    │
//! └──────────────┘              └──────────────┘           └──────┬───────┘
//!                                                                 │ deliveries
//!                                                                 ▼
//!                                                          ┌──────────────┐
//!                                                          │ DeliveryLoop │──▶ handler
//!                                                          └──────────────┘   ack / nack
//! ```
//!
//! ## Guarantees
//!
//! - **At-least-once delivery:** handler failures are rejected and redelivered
//!   by the broker, then dead-lettered to `<topic>-dlq` after 5 attempts
//! - **Malformed payloads are dropped:** acknowledged once, never retried
//! - **Per-key ordering:** only when the publisher supplies an ordering key
//! - **Total drain:** shutdown attempts every cached resource exactly once

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

// Re-export main types
pub use adapters::{DomainEvents, InMemoryBroker};
pub use config::{BusConfig, DeploymentEnvironment};
pub use domain::{
    AckReply, BusError, EnvelopeMetadata, EventDraft, EventEnvelope, GatewayError, HandlerError,
    MessageId, ProvisioningPolicy, PublishOptions, SubscribeOptions, SubscriptionSettings,
    WireMessage,
};
pub use ports::{
    BrokerGateway, EventHandler, EventPublisher, EventSubscriber, ReceivedEvent, SharedHandler,
};
pub use service::{EventBus, HandlerRegistration, ShutdownReport};

/// Envelope schema version stamped on every published event.
pub const ENVELOPE_VERSION: &str = "1.0";
