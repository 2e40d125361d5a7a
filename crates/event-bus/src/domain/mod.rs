//! Domain layer: envelope, codec, errors and value objects.

pub mod codec;
pub mod envelope;
pub mod errors;
pub mod value_objects;

pub use codec::{decode, encode, Decoded, EncodedMessage, MalformedReason};
pub use envelope::{EnvelopeMetadata, EventDraft, EventEnvelope, WireMessage, UNKNOWN_EVENT_TYPE};
pub use errors::{BusError, GatewayError, HandlerError};
pub use value_objects::*;
