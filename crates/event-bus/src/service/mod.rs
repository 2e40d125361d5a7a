//! Service layer: registries, publish engine, delivery loop and lifecycle.

pub mod delivery;
pub mod filter;
pub mod lifecycle;
pub mod publisher;
pub mod subscription_registry;
pub mod topic_registry;

pub use delivery::{ActiveSubscription, DeliveryLoop, DrainOutcome};
pub use filter::FilteredHandler;
pub use lifecycle::{EventBus, HandlerRegistration, ShutdownReport};
pub use publisher::{FlushReport, Publisher};
pub use subscription_registry::SubscriptionRegistry;
pub use topic_registry::TopicRegistry;
