//! Adapters layer: the in-process broker and the domain event catalog.

pub mod catalog;
pub mod memory;

pub use catalog::DomainEvents;
pub use memory::{InMemoryBroker, StoredMessage};
