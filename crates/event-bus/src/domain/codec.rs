//! # Envelope Codec
//!
//! Converts a [`WireMessage`] to the broker's byte payload plus a flat
//! string attribute map, and back.
//!
//! Decoding never fails loudly: malformed input yields
//! [`Decoded::Invalid`], which the delivery loop acknowledges and drops.
//! Redelivering a payload that cannot be parsed can never succeed.

use std::collections::BTreeMap;

use serde_json::Value;

use super::envelope::{EnvelopeMetadata, EventEnvelope, WireMessage};
use super::errors::BusError;

/// Attribute keys stamped on every message.
pub mod attributes {
    pub const EVENT_TYPE: &str = "eventType";
    pub const EVENT_ID: &str = "eventId";
    pub const SOURCE: &str = "source";
    pub const VERSION: &str = "version";
}

/// Broker-facing form of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
}

/// Why a delivered payload was rejected by the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Bytes are not a JSON document.
    NotStructured(String),
    /// `data.eventType` is absent, not a string, or empty.
    MissingEventType,
    /// Structured, but does not have the wire message shape.
    Schema(String),
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStructured(e) => write!(f, "payload is not structured data: {}", e),
            Self::MissingEventType => write!(f, "payload has no data.eventType"),
            Self::Schema(e) => write!(f, "payload does not match the wire schema: {}", e),
        }
    }
}

/// Result of decoding a delivered payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Valid(Box<WireMessage>),
    Invalid(MalformedReason),
}

impl Decoded {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// The message, if decoding succeeded.
    pub fn into_message(self) -> Option<WireMessage> {
        match self {
            Self::Valid(message) => Some(*message),
            Self::Invalid(_) => None,
        }
    }
}

/// Serialize a wire message and derive its standard attributes.
pub fn encode(message: &WireMessage) -> Result<EncodedMessage, BusError> {
    let data = serde_json::to_vec(message).map_err(|e| BusError::Serialization(e.to_string()))?;

    Ok(EncodedMessage {
        data,
        attributes: standard_attributes(&message.data),
    })
}

/// Encode an envelope and metadata, stamping `publishedAt` with now.
pub fn encode_parts(
    envelope: EventEnvelope,
    metadata: EnvelopeMetadata,
) -> Result<(WireMessage, EncodedMessage), BusError> {
    let message = WireMessage::new(envelope, metadata);
    let encoded = encode(&message)?;
    Ok((message, encoded))
}

/// The four attributes every message carries for broker-side filtering.
pub fn standard_attributes(envelope: &EventEnvelope) -> BTreeMap<String, String> {
    BTreeMap::from([
        (attributes::EVENT_TYPE.to_string(), envelope.event_type.clone()),
        (attributes::EVENT_ID.to_string(), envelope.event_id.clone()),
        (attributes::SOURCE.to_string(), envelope.source.clone()),
        (attributes::VERSION.to_string(), envelope.version.clone()),
    ])
}

/// Parse a delivered payload.
pub fn decode(bytes: &[u8]) -> Decoded {
    let value: Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => return Decoded::Invalid(MalformedReason::NotStructured(e.to_string())),
    };

    let has_event_type = value
        .get("data")
        .and_then(|data| data.get("eventType"))
        .and_then(Value::as_str)
        .is_some_and(|event_type| !event_type.is_empty());
    if !has_event_type {
        return Decoded::Invalid(MalformedReason::MissingEventType);
    }

    match serde_json::from_value::<WireMessage>(value) {
        Ok(message) => Decoded::Valid(Box::new(message)),
        Err(e) => Decoded::Invalid(MalformedReason::Schema(e.to_string())),
    }
}
