//! # Delivery Loop
//!
//! One task per active subscription pulls deliveries from the broker and
//! dispatches each onto its own task, bounded by a semaphore:
//!
//! ```text
//! DeliveryChannel ──next()──▶ [permit] ──spawn──▶ decode
//!                                                  ├─ invalid  → Ack (dropped for good)
//!                                                  ├─ refused  → Ack (filtered)
//!                                                  └─ valid    → handler
//!                                                                 ├─ Ok    → Ack
//!                                                                 ├─ Err   → Nack
//!                                                                 └─ panic → Nack (delivery dropped)
//! ```
//!
//! Redelivery and dead-lettering are left to the broker; the loop counts
//! nothing itself. The broker leases no more messages than the loop has
//! permits, so nothing waits in the channel long enough to expire.
//!
//! Stopping waits for dispatched handlers up to the subscription's ack
//! deadline. Past that point the broker has taken the messages back.

use std::sync::Arc;

use bus_telemetry::metrics::outcome;
use bus_telemetry::{HistogramTimer, DELIVERIES, DELIVERIES_IN_FLIGHT, HANDLER_DURATION};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::domain::{decode, AckReply, Decoded};
use crate::ports::{Delivery, DeliveryChannel, ReceivedEvent, SharedHandler, SubscriptionHandle};

/// Running consumer for one subscription.
#[derive(Debug)]
pub struct ActiveSubscription {
    handle: Arc<SubscriptionHandle>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<DrainOutcome>,
}

/// How the in-flight handlers finished when a subscription was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Handlers that completed while draining
    pub completed: usize,
    /// Handlers still running when the ack deadline passed
    pub abandoned: usize,
}

impl ActiveSubscription {
    pub fn handle(&self) -> &Arc<SubscriptionHandle> {
        &self.handle
    }

    /// Stop receiving and wait for dispatched handlers.
    ///
    /// Deliveries still queued in the channel are released back to the
    /// broker. Handlers still running when the ack deadline passes keep
    /// running detached; the broker has already reclaimed their messages.
    pub async fn stop(mut self) -> DrainOutcome {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(subscription = %self.handle.name(), error = %e, "Delivery loop task failed");
                DrainOutcome {
                    completed: 0,
                    abandoned: 0,
                }
            }
        }
    }
}

/// Spawns and drives delivery loops.
pub struct DeliveryLoop {
    handle: Arc<SubscriptionHandle>,
    channel: DeliveryChannel,
    handler: SharedHandler,
    permits: Arc<Semaphore>,
}

impl DeliveryLoop {
    pub fn new(
        handle: Arc<SubscriptionHandle>,
        channel: DeliveryChannel,
        handler: SharedHandler,
        max_concurrency: usize,
    ) -> Self {
        Self {
            handle,
            channel,
            handler,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> ActiveSubscription {
        let handle = self.handle.clone();
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            subscription = %handle.name(),
            topic = %handle.topic(),
            max_concurrency = self.permits.available_permits(),
            "Delivery loop started"
        );

        let task = tokio::spawn(self.run(stop_rx));

        ActiveSubscription {
            handle,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) -> DrainOutcome {
        let subscription: Arc<str> = Arc::from(self.handle.name());
        let mut in_flight = JoinSet::new();

        loop {
            while let Some(result) = in_flight.try_join_next() {
                report_join(&subscription, result);
            }

            let permit = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                permit = self.permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else { break };

            let delivery = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                delivery = self.channel.next() => delivery,
            };
            let Some(delivery) = delivery else {
                debug!(subscription = %subscription, "Delivery channel closed by broker");
                break;
            };

            let handler = self.handler.clone();
            let name = subscription.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                dispatch(&name, delivery, handler).await;
            });
        }

        self.channel.close();
        self.drain(&subscription, in_flight).await
    }

    async fn drain(&self, subscription: &str, mut in_flight: JoinSet<()>) -> DrainOutcome {
        let window = self.handle.ack_deadline();
        let mut completed = 0;
        let waited = tokio::time::timeout(window, async {
            while let Some(result) = in_flight.join_next().await {
                report_join(subscription, result);
                completed += 1;
            }
        })
        .await;

        let abandoned = in_flight.len();
        if waited.is_err() {
            warn!(
                subscription = %subscription,
                abandoned,
                ack_deadline_secs = window.as_secs(),
                "Ack deadline passed with handlers still running"
            );
            in_flight.detach_all();
        }

        info!(subscription = %subscription, completed, abandoned, "Delivery loop stopped");
        DrainOutcome {
            completed,
            abandoned,
        }
    }
}

fn report_join(subscription: &str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(subscription = %subscription, "Handler panicked; message rejected");
            DELIVERIES
                .with_label_values(&[subscription, outcome::NACK])
                .inc();
        }
    }
}

struct InFlight;

impl InFlight {
    fn enter() -> Self {
        DELIVERIES_IN_FLIGHT.inc();
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        DELIVERIES_IN_FLIGHT.dec();
    }
}

/// Decode, invoke the handler and settle one delivery.
///
/// A panic inside the handler unwinds through here and drops `delivery`
/// unsettled, which the broker treats as a rejection.
async fn dispatch(subscription: &str, delivery: Delivery, handler: SharedHandler) {
    let _in_flight = InFlight::enter();

    let message = match decode(delivery.data()) {
        Decoded::Valid(message) => *message,
        Decoded::Invalid(reason) => {
            warn!(
                subscription = %subscription,
                message_id = %delivery.message_id(),
                reason = %reason,
                "Dropping malformed message"
            );
            DELIVERIES
                .with_label_values(&[subscription, outcome::MALFORMED])
                .inc();
            delivery.settle(AckReply::Ack);
            return;
        }
    };

    let event = ReceivedEvent {
        message_id: delivery.message_id().to_string(),
        envelope: message.data,
        metadata: message.metadata,
        published_at: message.published_at,
        attributes: delivery.attributes().clone(),
        delivery_attempt: delivery.delivery_attempt(),
    };
    let event_id = event.envelope.event_id.clone();
    let event_type = event.envelope.event_type.clone();

    if !handler.accepts(&event_type) {
        trace!(
            subscription = %subscription,
            message_id = %delivery.message_id(),
            event_type = %event_type,
            "Event filtered out"
        );
        DELIVERIES
            .with_label_values(&[subscription, outcome::FILTERED])
            .inc();
        delivery.settle(AckReply::Ack);
        return;
    }

    let result = {
        let _timer = HistogramTimer::new(&HANDLER_DURATION, &[subscription]);
        handler.handle(event).await
    };

    match result {
        Ok(()) => {
            debug!(
                subscription = %subscription,
                message_id = %delivery.message_id(),
                event_id = %event_id,
                event_type = %event_type,
                "Event handled"
            );
            DELIVERIES
                .with_label_values(&[subscription, outcome::ACK])
                .inc();
            delivery.settle(AckReply::Ack);
        }
        Err(e) => {
            warn!(
                subscription = %subscription,
                message_id = %delivery.message_id(),
                event_id = %event_id,
                event_type = %event_type,
                attempt = delivery.delivery_attempt(),
                error = %e,
                "Handler failed; message rejected"
            );
            DELIVERIES
                .with_label_values(&[subscription, outcome::NACK])
                .inc();
            delivery.settle(AckReply::Nack);
        }
    }
}
