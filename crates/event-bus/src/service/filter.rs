//! Event-type allow-list in front of a consumer handler.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::domain::HandlerError;
use crate::ports::{EventHandler, ReceivedEvent, SharedHandler};

/// Forwards only allow-listed event types to the inner handler.
///
/// Everything else completes successfully without reaching the handler, so
/// it is acknowledged and never redelivered or dead-lettered. The delivery
/// loop consults [`EventHandler::accepts`] first and records those events as
/// `filtered` only.
pub struct FilteredHandler {
    subscription: String,
    allowed: HashSet<String>,
    inner: SharedHandler,
}

impl FilteredHandler {
    pub fn new(
        subscription: impl Into<String>,
        event_types: impl IntoIterator<Item = String>,
        inner: SharedHandler,
    ) -> Self {
        Self {
            subscription: subscription.into(),
            allowed: event_types.into_iter().collect(),
            inner,
        }
    }

    pub fn shared(self) -> SharedHandler {
        Arc::new(self)
    }
}

#[async_trait]
impl EventHandler for FilteredHandler {
    async fn handle(&self, event: ReceivedEvent) -> Result<(), HandlerError> {
        if !self.accepts(event.event_type()) {
            trace!(
                subscription = %self.subscription,
                event_type = %event.event_type(),
                "Event filtered out"
            );
            return Ok(());
        }
        self.inner.handle(event).await
    }

    fn accepts(&self, event_type: &str) -> bool {
        self.allowed.contains(event_type) && self.inner.accepts(event_type)
    }
}
