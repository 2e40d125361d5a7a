//! # Metrics Wiring
//!
//! Bus activity shows up in the Prometheus collectors exported by
//! `bus-telemetry`. Label values are unique per test so parallel tests do
//! not interfere.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::integration::fixtures::{broker, bus, eventually, Flaky, Recorder};
    use bus_telemetry::metrics::outcome;
    use bus_telemetry::{
        encode_metrics, register_metrics, DELIVERIES, MESSAGES_PUBLISHED, PUBLISH_FAILURES,
    };
    use event_bus::{
        EventDraft, EventPublisher, EventSubscriber, PublishOptions, SubscribeOptions,
    };
    use serde_json::json;

    fn deliveries(subscription: &str, outcome: &str) -> f64 {
        DELIVERIES.with_label_values(&[subscription, outcome]).get()
    }

    #[tokio::test]
    async fn test_delivery_outcomes_are_counted() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("metrics-svc", &broker);

        service
            .subscribe("metrics-ok-topic", "metrics-ok-sub", Recorder::new(), SubscribeOptions::default())
            .await?;
        service
            .subscribe(
                "metrics-fail-topic",
                "metrics-fail-sub",
                Flaky::failing(1),
                SubscribeOptions::default(),
            )
            .await?;

        service
            .publish("metrics-ok-topic", EventDraft::new("post.liked", json!({})), PublishOptions::default())
            .await?;
        broker
            .publish_raw("metrics-ok-topic", b"garbage".to_vec(), BTreeMap::new())
            .await?;
        service
            .publish("metrics-fail-topic", EventDraft::new("post.liked", json!({})), PublishOptions::default())
            .await?;

        eventually(|| {
            deliveries("metrics-ok-sub", outcome::ACK) >= 1.0
                && deliveries("metrics-ok-sub", outcome::MALFORMED) >= 1.0
                && deliveries("metrics-fail-sub", outcome::NACK) >= 1.0
                && deliveries("metrics-fail-sub", outcome::ACK) >= 1.0
        })
        .await;

        let published = MESSAGES_PUBLISHED
            .with_label_values(&["metrics-ok-topic", "post.liked"])
            .get();
        assert!(published >= 1.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_failures_are_counted_and_exported() -> anyhow::Result<()> {
        let broker = broker();
        let service = bus("metrics-fail-svc", &broker);
        broker.add_topic("metrics-broken-topic");
        broker.fail_publish("metrics-broken-topic");

        let result = service
            .publish("metrics-broken-topic", EventDraft::new("x.y", json!({})), PublishOptions::default())
            .await;
        assert!(result.is_err());
        assert!(PUBLISH_FAILURES.with_label_values(&["metrics-broken-topic"]).get() >= 1.0);

        register_metrics()?;
        let text = encode_metrics()?;
        assert!(text.contains("eventbus_publish_failures_total"));
        Ok(())
    }
}
