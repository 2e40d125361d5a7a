//! # Ordering Keys
//!
//! Messages that share an ordering key arrive in publish order even when
//! the subscription runs many handlers at once. Messages without a key
//! carry no ordering guarantee.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::integration::fixtures::{broker, bus, eventually};
    use event_bus::{
        EventDraft, EventPublisher, EventSubscriber, HandlerError, PublishOptions,
        ReceivedEvent, SharedHandler, SubscribeOptions,
    };
    use parking_lot::Mutex;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_delivered_in_publish_order() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("feed-svc", &broker);

        let seen: Arc<Mutex<Vec<(String, u64)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: SharedHandler = Arc::new(move |event: ReceivedEvent| {
            let sink = sink.clone();
            async move {
                let seq = event.envelope.payload["seq"].as_u64().unwrap_or_default();
                // Later messages finish faster; only key ordering keeps them in line
                tokio::time::sleep(Duration::from_millis(20 - seq % 20)).await;
                let key = event.envelope.payload["postId"].as_str().unwrap_or_default().to_string();
                sink.lock().push((key, seq));
                Ok::<(), HandlerError>(())
            }
        });
        service
            .subscribe(
                "content-events",
                "feed-svc-content-events",
                handler,
                SubscribeOptions::default().with_max_concurrency(8),
            )
            .await?;

        for seq in 0..10u64 {
            for post in ["p1", "p2"] {
                service
                    .publish(
                        "content-events",
                        EventDraft::new("post.created", json!({"postId": post, "seq": seq})),
                        PublishOptions::ordered_by(post),
                    )
                    .await?;
            }
        }

        eventually(|| seen.lock().len() == 20).await;

        let seen = seen.lock().clone();
        for post in ["p1", "p2"] {
            let order: Vec<u64> = seen
                .iter()
                .filter(|(key, _)| key == post)
                .map(|(_, seq)| *seq)
                .collect();
            assert_eq!(order, (0..10).collect::<Vec<_>>(), "order for {}", post);
        }
        Ok(())
    }
}
