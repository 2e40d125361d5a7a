//! # Shutdown Drain
//!
//! Shutdown is total: every cached subscription is closed and every cached
//! topic flushed exactly once, whatever fails along the way, and all caches
//! end up empty.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::integration::fixtures::{broker, bus, Recorder, WAIT};
    use event_bus::{
        BusError, EventBus, EventDraft, EventPublisher, EventSubscriber, HandlerError,
        InMemoryBroker, PublishOptions, ReceivedEvent, SharedHandler, SubscribeOptions,
    };
    use serde_json::json;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_drain_attempts_everything_despite_failures() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("notif-svc", &broker);

        for (topic, subscription) in [
            ("interaction-events", "notif-svc-interaction-events"),
            ("user-events", "notif-svc-user-events"),
            ("content-events", "notif-svc-content-events"),
        ] {
            service
                .subscribe(topic, subscription, Recorder::new(), SubscribeOptions::default())
                .await?;
        }
        service
            .publish("audit-events", EventDraft::new("audit.recorded", json!({})), PublishOptions::default())
            .await?;

        broker.fail_close("notif-svc-user-events");
        broker.fail_flush("interaction-events");
        broker.fail_flush("audit-events");

        let cached_topics = service.topics().len();
        assert_eq!(cached_topics, 7);

        let report = service.shutdown().await;

        assert_eq!(report.subscriptions_closed, 2);
        assert_eq!(report.close_failures, vec!["notif-svc-user-events".to_string()]);
        assert_eq!(report.topics_flushed, cached_topics - 2);
        let mut flush_failures = report.flush_failures.clone();
        flush_failures.sort();
        assert_eq!(flush_failures, vec!["audit-events".to_string(), "interaction-events".to_string()]);

        assert_eq!(broker.close_calls(), 3);
        assert_eq!(broker.flush_calls(), cached_topics);

        assert!(service.topics().is_empty());
        assert!(service.subscriptions().is_empty());
        assert!(service.registrations().is_empty());
        assert!(service.active_subscriptions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_running_handler() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("notif-svc", &broker);

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(parking_lot::Mutex::new(Some(started_tx)));
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let handler: SharedHandler = Arc::new(move |_event: ReceivedEvent| {
            let started = started_tx.lock().take();
            let done = done.clone();
            async move {
                if let Some(started) = started {
                    let _ = started.send(());
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
                done.store(true, Ordering::SeqCst);
                Ok::<(), HandlerError>(())
            }
        });
        service
            .subscribe("t", "s", handler, SubscribeOptions::default())
            .await?;
        service
            .publish("t", EventDraft::new("slow.event", json!({})), PublishOptions::default())
            .await?;

        tokio::time::timeout(WAIT, started_rx).await??;
        let report = service.shutdown().await;

        assert!(finished.load(Ordering::SeqCst));
        assert!(report.is_clean());
        assert_eq!(broker.acknowledged("s").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_handler_publish_during_drain_is_flushed() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("notif-svc", &broker);

        let (started_tx, started_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(parking_lot::Mutex::new(Some(started_tx)));
        let publisher: Arc<EventBus<InMemoryBroker>> = service.clone();
        let handler: SharedHandler = Arc::new(move |event: ReceivedEvent| {
            let started = started_tx.lock().take();
            let publisher = publisher.clone();
            async move {
                if let Some(started) = started {
                    let _ = started.send(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                publisher
                    .publish(
                        "notifications",
                        EventDraft::new("notification.sent", json!({"for": event.envelope.event_id})),
                        PublishOptions::default(),
                    )
                    .await?;
                Ok::<(), HandlerError>(())
            }
        });
        service
            .subscribe("interaction-events", "notif-svc-interaction-events", handler, SubscribeOptions::default())
            .await?;
        service
            .publish("interaction-events", EventDraft::new("post.liked", json!({})), PublishOptions::default())
            .await?;

        tokio::time::timeout(WAIT, started_rx).await??;
        let report = service.shutdown().await;

        assert!(report.is_clean());
        assert_eq!(broker.published("notifications").len(), 1);
        assert_eq!(broker.acknowledged("notif-svc-interaction-events").len(), 1);

        let late = service
            .publish("notifications", EventDraft::new("notification.sent", json!({})), PublishOptions::default())
            .await;
        assert!(matches!(late, Err(BusError::ShuttingDown)));
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_refused_once_shutdown_began() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("notif-svc", &broker);

        let first = service.shutdown().await;
        assert_eq!(first.subscriptions_closed, 0);
        assert_eq!(service.shutdown().await, Default::default());

        let err = service
            .subscribe("t", "s", Recorder::new(), SubscribeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::ShuttingDown));
        assert!(!broker.has_subscription("s"));
        Ok(())
    }
}
