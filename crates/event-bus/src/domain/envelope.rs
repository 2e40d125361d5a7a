//! # Event Envelope
//!
//! The unit of transport and the data stamped around it.
//!
//! ```text
//! WireMessage
//! ├── data: EventEnvelope       (business meaning)
//! │   ├── eventId, eventType, timestamp, version, source
//! │   └── payload               (opaque to the engine)
//! ├── metadata: EnvelopeMetadata (correlationId, traceId)
//! └── publishedAt
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ENVELOPE_VERSION;

/// Event type used when the caller does not name one.
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// The structured event record carried by every message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Unique identifier minted at publish time.
    pub event_id: String,
    /// Dot-namespaced event kind, e.g. `post.liked`.
    pub event_type: String,
    /// Creation instant.
    pub timestamp: DateTime<Utc>,
    /// Envelope schema version.
    pub version: String,
    /// Publishing service.
    pub source: String,
    /// Event-specific data.
    pub payload: Value,
}

/// Correlation data minted per publish call, independent of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMetadata {
    pub correlation_id: String,
    pub trace_id: String,
}

impl EnvelopeMetadata {
    /// Mint a fresh correlation/trace pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            trace_id: Uuid::new_v4().to_string(),
        }
    }
}

/// What actually crosses the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub data: EventEnvelope,
    pub metadata: EnvelopeMetadata,
    pub published_at: DateTime<Utc>,
}

impl WireMessage {
    /// Wrap an envelope and its metadata, stamping `publishedAt` with now.
    #[must_use]
    pub fn new(data: EventEnvelope, metadata: EnvelopeMetadata) -> Self {
        Self {
            data,
            metadata,
            published_at: Utc::now(),
        }
    }
}

/// Caller-supplied partial event.
///
/// Only `event_type` and `payload` are normally set. The remaining fields
/// override the values the engine would stamp; empty strings are ignored so
/// the required envelope fields can never be blank on the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventDraft {
    pub event_type: Option<String>,
    pub payload: Value,
    pub event_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub source: Option<String>,
}

impl EventDraft {
    /// Draft with an event type and payload.
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: Some(event_type.into()),
            payload,
            ..Default::default()
        }
    }

    /// Serialize a typed payload into a draft.
    pub fn from_payload<T: Serialize>(
        event_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(payload)?))
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Materialize a full envelope.
    ///
    /// Engine defaults are stamped first, then every non-empty caller field
    /// is laid over them.
    pub fn materialize(self, service_name: &str) -> EventEnvelope {
        let mut envelope = EventEnvelope {
            event_id: Uuid::new_v4().to_string(),
            event_type: UNKNOWN_EVENT_TYPE.to_string(),
            timestamp: Utc::now(),
            version: ENVELOPE_VERSION.to_string(),
            source: service_name.to_string(),
            payload: self.payload,
        };

        if let Some(event_type) = non_empty(self.event_type) {
            envelope.event_type = event_type;
        }
        if let Some(event_id) = non_empty(self.event_id) {
            envelope.event_id = event_id;
        }
        if let Some(timestamp) = self.timestamp {
            envelope.timestamp = timestamp;
        }
        if let Some(version) = non_empty(self.version) {
            envelope.version = version;
        }
        if let Some(source) = non_empty(self.source) {
            envelope.source = source;
        }
        // A blank service name must not leak onto the wire either
        if envelope.source.is_empty() {
            envelope.source = crate::config::DEFAULT_SERVICE_NAME.to_string();
        }

        envelope
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
