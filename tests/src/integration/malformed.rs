//! # Malformed Payloads
//!
//! Bytes that do not decode into a wire message, or decode without an
//! event type, are acknowledged once and dropped. The handler never sees
//! them and they never reach the dead-letter topic.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::integration::fixtures::{broker, bus, eventually, Recorder};
    use event_bus::{EventDraft, EventPublisher, EventSubscriber, PublishOptions, SubscribeOptions};
    use serde_json::json;

    const TOPIC: &str = "interaction-events";
    const SUBSCRIPTION: &str = "notif-svc-interaction-events";

    #[tokio::test]
    async fn test_malformed_payloads_are_acked_and_skipped() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("notif-svc", &broker);
        let recorder = Recorder::new();
        service
            .subscribe(TOPIC, SUBSCRIPTION, recorder.clone(), SubscribeOptions::default())
            .await?;

        let payloads: Vec<Vec<u8>> = vec![
            b"\x00\x01 definitely not json".to_vec(),
            b"[1, 2, 3]".to_vec(),
            json!({"data": {"eventType": "", "payload": {}}}).to_string().into_bytes(),
            json!({"data": {"payload": {"postId": "p1"}}}).to_string().into_bytes(),
            json!({"data": {"eventType": 42}}).to_string().into_bytes(),
        ];
        for data in payloads {
            broker.publish_raw(TOPIC, data, BTreeMap::new()).await?;
        }

        eventually(|| broker.acknowledged(SUBSCRIPTION).len() == 5).await;
        assert_eq!(recorder.len(), 0);
        assert!(broker.dead_lettered(SUBSCRIPTION).is_empty());

        // The subscription keeps working afterwards
        service
            .publish(
                TOPIC,
                EventDraft::new("post.liked", json!({"postId": "p1", "userId": "u1"})),
                PublishOptions::default(),
            )
            .await?;
        recorder.wait_for(1).await;
        assert_eq!(recorder.event_types(), vec!["post.liked".to_string()]);
        Ok(())
    }
}
