//! # Event-Type Filtering
//!
//! `subscribe_to_events` hands only allow-listed types to the handler.
//! Everything else is acknowledged unseen: never redelivered, never
//! dead-lettered.

#[cfg(test)]
mod tests {
    use crate::integration::fixtures::{broker, bus, eventually, Recorder};
    use event_bus::adapters::catalog::{event_types, topics, CommentCreated, PostLiked, PostUnliked};
    use event_bus::{DomainEvents, EventSubscriber, SubscribeOptions};

    #[tokio::test]
    async fn test_only_allow_listed_types_reach_handler() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("notif-svc", &broker);
        let recorder = Recorder::new();

        service
            .subscribe_to_events(
                topics::INTERACTION_EVENTS,
                "notif-svc-likes",
                vec![event_types::POST_LIKED.to_string()],
                recorder.clone(),
                SubscribeOptions::default(),
            )
            .await?;

        let events = DomainEvents::new(service.clone());
        events
            .post_unliked(&PostUnliked {
                post_id: "p1".into(),
                user_id: "u1".into(),
            })
            .await?;
        events
            .post_liked(&PostLiked {
                post_id: "p1".into(),
                user_id: "u2".into(),
            })
            .await?;
        events
            .comment_created(&CommentCreated {
                comment_id: "c1".into(),
                post_id: "p1".into(),
                user_id: "u3".into(),
            })
            .await?;

        eventually(|| broker.acknowledged("notif-svc-likes").len() == 3).await;

        assert_eq!(recorder.event_types(), vec!["post.liked".to_string()]);
        assert!(broker.dead_lettered("notif-svc-likes").is_empty());
        assert_eq!(broker.unsettled("notif-svc-likes"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_filtered_and_unfiltered_subscriptions_coexist() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("analytics-svc", &broker);
        let everything = Recorder::new();
        let likes = Recorder::new();

        service
            .subscribe(
                topics::INTERACTION_EVENTS,
                "analytics-all",
                everything.clone(),
                SubscribeOptions::default(),
            )
            .await?;
        service
            .subscribe_to_events(
                topics::INTERACTION_EVENTS,
                "analytics-likes",
                vec![
                    event_types::POST_LIKED.to_string(),
                    event_types::POST_UNLIKED.to_string(),
                ],
                likes.clone(),
                SubscribeOptions::default(),
            )
            .await?;

        let events = DomainEvents::new(service.clone());
        events
            .post_liked(&PostLiked {
                post_id: "p1".into(),
                user_id: "u1".into(),
            })
            .await?;
        events
            .comment_created(&CommentCreated {
                comment_id: "c1".into(),
                post_id: "p1".into(),
                user_id: "u1".into(),
            })
            .await?;

        everything.wait_for(2).await;
        eventually(|| broker.acknowledged("analytics-likes").len() == 2).await;
        assert_eq!(likes.event_types(), vec!["post.liked".to_string()]);
        Ok(())
    }
}
