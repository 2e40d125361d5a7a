//! Shared fixtures: a fast-retrying broker, per-service buses and
//! recording handlers.

#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_bus::{
    BusConfig, DeploymentEnvironment, EventBus, EventHandler, HandlerError, InMemoryBroker,
    ReceivedEvent,
};
use parking_lot::Mutex;

/// Upper bound on any single wait in a scenario.
pub const WAIT: Duration = Duration::from_secs(10);

/// Broker that redelivers immediately instead of backing off.
pub fn broker() -> Arc<InMemoryBroker> {
    Arc::new(InMemoryBroker::new().with_retry_delay(Duration::ZERO))
}

/// A development-mode bus for `service` on a shared broker.
pub fn bus(service: &str, broker: &Arc<InMemoryBroker>) -> Arc<EventBus<InMemoryBroker>> {
    let config = BusConfig::for_service(service, DeploymentEnvironment::Development);
    Arc::new(EventBus::new(broker.clone(), config))
}

/// Poll `check` until it holds, failing the test after [`WAIT`].
pub async fn eventually(check: impl Fn() -> bool) {
    let outcome = tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "condition not reached within {:?}", WAIT);
}

/// Handler that records every event and succeeds.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<ReceivedEvent>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ReceivedEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub async fn wait_for(&self, count: usize) {
        eventually(|| self.len() >= count).await;
    }
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle(&self, event: ReceivedEvent) -> Result<(), HandlerError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Handler that fails its first `failures` invocations, then succeeds.
pub struct Flaky {
    failures: usize,
    calls: AtomicUsize,
    attempts: Mutex<Vec<u32>>,
}

impl Flaky {
    pub fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
            attempts: Mutex::new(Vec::new()),
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Self::failing(usize::MAX)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Broker delivery attempts observed, in call order.
    pub fn attempts(&self) -> Vec<u32> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl EventHandler for Flaky {
    async fn handle(&self, event: ReceivedEvent) -> Result<(), HandlerError> {
        self.attempts.lock().push(event.delivery_attempt);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(format!("downstream unavailable (call {})", call + 1).into());
        }
        Ok(())
    }
}
