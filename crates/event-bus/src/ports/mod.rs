//! Ports layer: the traits the engine exposes and the ones it depends on.

pub mod inbound;
pub mod outbound;

pub use inbound::{EventHandler, EventPublisher, EventSubscriber, ReceivedEvent, SharedHandler};
pub use outbound::{
    BrokerGateway, Delivery, DeliveryChannel, OutboundMessage, SubscriptionHandle, TopicHandle,
};
