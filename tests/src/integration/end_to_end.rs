//! # End-to-End Delivery
//!
//! ```text
//! [interaction-svc] ──post.liked──→ interaction-events
//!                                          │
//!                                          ↓
//!                        notif-svc-interaction-events
//!                                          │
//!                                          ↓
//!                                    [notif-svc handler]
//! ```

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{broker, bus, Recorder};
    use event_bus::adapters::catalog::{event_types, topics, PostLiked, UserRegistered};
    use event_bus::{
        DomainEvents, EventDraft, EventPublisher, EventSubscriber, PublishOptions,
        SharedHandler, SubscribeOptions,
    };
    use serde_json::json;

    const SUBSCRIPTION: &str = "notif-svc-interaction-events";

    #[tokio::test]
    async fn test_post_liked_reaches_notification_service() -> anyhow::Result<()> {
        let broker = broker();
        let producer = bus("interaction-svc", &broker);
        let consumer = bus("notif-svc", &broker);

        let recorder = Recorder::new();
        let handler: SharedHandler = recorder.clone();
        consumer
            .subscribe(topics::INTERACTION_EVENTS, SUBSCRIPTION, handler, SubscribeOptions::default())
            .await?;

        let events = DomainEvents::new(producer.clone());
        let first = events
            .post_liked(&PostLiked {
                post_id: "p1".into(),
                user_id: "u1".into(),
            })
            .await?;
        let second = producer
            .publish(
                topics::INTERACTION_EVENTS,
                EventDraft::new(event_types::POST_LIKED, json!({"postId": "p2", "userId": "u1"})),
                PublishOptions::default(),
            )
            .await?;

        recorder.wait_for(2).await;
        let mut received = recorder.events();
        received.sort_by_key(|e| e.message_id == second);

        let event = &received[0];
        assert_eq!(event.message_id, first);
        assert_eq!(event.event_type(), "post.liked");
        assert_eq!(event.envelope.payload, json!({"postId": "p1", "userId": "u1"}));
        assert_eq!(event.payload_as::<PostLiked>()?.post_id, "p1");
        assert_eq!(event.envelope.source, "interaction-svc");
        assert_eq!(event.envelope.version, "1.0");
        assert_eq!(event.attributes["eventType"], "post.liked");
        assert_eq!(event.attributes["eventId"], event.envelope.event_id);

        assert!(!event.metadata.correlation_id.is_empty());
        assert!(!event.metadata.trace_id.is_empty());
        let other = &received[1];
        assert_ne!(event.metadata.correlation_id, other.metadata.correlation_id);
        assert_ne!(event.metadata.trace_id, other.metadata.trace_id);

        assert!(broker.has_topic("interaction-events-dlq"));
        producer.shutdown().await;
        consumer.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_every_subscription_gets_its_own_copy() -> anyhow::Result<()> {
        let broker = broker();
        let producer = bus("user-svc", &broker);
        let feed = bus("feed-svc", &broker);
        let mail = bus("mail-svc", &broker);

        let feed_events = Recorder::new();
        let mail_events = Recorder::new();
        feed.subscribe(
            topics::USER_EVENTS,
            "feed-svc-user-events",
            feed_events.clone(),
            SubscribeOptions::default(),
        )
        .await?;
        mail.subscribe(
            topics::USER_EVENTS,
            "mail-svc-user-events",
            mail_events.clone(),
            SubscribeOptions::default(),
        )
        .await?;

        DomainEvents::new(producer.clone())
            .user_registered(&UserRegistered {
                user_id: "u7".into(),
                username: "grace".into(),
            })
            .await?;

        feed_events.wait_for(1).await;
        mail_events.wait_for(1).await;
        assert_eq!(feed_events.events()[0].envelope.event_id, mail_events.events()[0].envelope.event_id);
        Ok(())
    }

    #[tokio::test]
    async fn test_caller_overrides_survive_the_wire() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("content-svc", &broker);
        let recorder = Recorder::new();
        service
            .subscribe(
                topics::CONTENT_EVENTS,
                "search-svc-content-events",
                recorder.clone(),
                SubscribeOptions::default(),
            )
            .await?;

        service
            .publish(
                topics::CONTENT_EVENTS,
                EventDraft::new(event_types::POST_CREATED, json!({"postId": "p3"}))
                    .with_event_id("evt-fixed")
                    .with_version("2.0")
                    .with_source(""),
                PublishOptions::default().with_attribute("tenant", "acme"),
            )
            .await?;

        recorder.wait_for(1).await;
        let event = &recorder.events()[0];
        assert_eq!(event.envelope.event_id, "evt-fixed");
        assert_eq!(event.envelope.version, "2.0");
        // Empty overrides are ignored
        assert_eq!(event.envelope.source, "content-svc");
        assert_eq!(event.attributes["tenant"], "acme");
        Ok(())
    }
}
