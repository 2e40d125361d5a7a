//! # In-Memory Broker
//!
//! [`BrokerGateway`] implementation for development and tests. It keeps the
//! managed broker's observable behavior:
//!
//! - every published message fans out to all subscriptions on its topic
//! - messages sharing an ordering key are delivered one at a time, in order
//! - a channel never holds more leased messages than it asked for, and a
//!   message's ack deadline starts when it is leased
//! - a `Nack`, a dropped delivery or an expired ack deadline causes
//!   redelivery with exponential backoff and an incremented attempt counter
//! - after `max_delivery_attempts` the message moves to the dead-letter topic
//!
//! Call counters, inspection helpers and failure injection make the engine's
//! side of the contract observable in tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::domain::{AckReply, GatewayError, MessageId, SubscriptionSettings};
use crate::ports::{
    BrokerGateway, Delivery, DeliveryChannel, OutboundMessage, SubscriptionHandle, TopicHandle,
};

/// Attribute naming the subscription a dead-lettered message came from.
pub const DEAD_LETTER_SOURCE_ATTRIBUTE: &str = "deadLetterSourceSubscription";

/// A message as stored on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message_id: MessageId,
    pub data: Vec<u8>,
    pub attributes: BTreeMap<String, String>,
    pub ordering_key: Option<String>,
}

#[derive(Debug)]
struct Pending {
    message: StoredMessage,
    attempts: u32,
}

#[derive(Debug, Default)]
struct TopicState {
    messages: Vec<StoredMessage>,
    subscriptions: Vec<String>,
}

#[derive(Debug)]
struct SubscriptionState {
    topic: String,
    settings: SubscriptionSettings,
    backlog: VecDeque<Pending>,
    sender: Option<mpsc::Sender<Delivery>>,
    busy_keys: HashSet<String>,
    outstanding: usize,
    max_outstanding: usize,
    /// Rejected messages waiting out their backoff
    retrying: usize,
    acknowledged: Vec<MessageId>,
    dead_lettered: Vec<MessageId>,
}

impl SubscriptionState {
    fn new(topic: &str, settings: SubscriptionSettings) -> Self {
        Self {
            topic: topic.to_string(),
            settings,
            backlog: VecDeque::new(),
            sender: None,
            busy_keys: HashSet::new(),
            outstanding: 0,
            max_outstanding: 1,
            retrying: 0,
            acknowledged: Vec::new(),
            dead_lettered: Vec::new(),
        }
    }

    fn release(&mut self, message: &StoredMessage) {
        self.release_lease();
        self.release_key(message);
    }

    fn release_lease(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    fn release_key(&mut self, message: &StoredMessage) {
        if let Some(key) = &message.ordering_key {
            self.busy_keys.remove(key);
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    /// Topic -> successful publishes left before every publish fails
    publish: HashMap<String, usize>,
    flush: HashSet<String>,
    close: HashSet<String>,
    racing_topics: HashSet<String>,
    /// Pause before answering `topic_exists` and `subscription_exists`
    lookup_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    topic_exists: usize,
    subscription_exists: usize,
    create_topic: usize,
    create_subscription: usize,
    flush: usize,
    close: usize,
    publish: HashMap<String, usize>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, TopicState>,
    subscriptions: HashMap<String, SubscriptionState>,
    faults: Faults,
    counters: Counters,
    next_id: u64,
    retry_delay: Option<Duration>,
}

type SharedState = Arc<Mutex<BrokerState>>;

impl BrokerState {
    fn check_available(&self) -> Result<(), GatewayError> {
        if self.faults.unavailable {
            return Err(GatewayError::Unavailable("in-memory broker offline".into()));
        }
        Ok(())
    }

    /// Store a message on `topic` and queue it on every attached subscription.
    fn append(
        &mut self,
        topic: &str,
        data: Vec<u8>,
        attributes: BTreeMap<String, String>,
        ordering_key: Option<String>,
    ) -> Result<(MessageId, Vec<String>), GatewayError> {
        self.next_id += 1;
        let message_id = self.next_id.to_string();

        let state = self
            .topics
            .get_mut(topic)
            .ok_or_else(|| GatewayError::NotFound(topic.to_string()))?;

        let message = StoredMessage {
            message_id: message_id.clone(),
            data,
            attributes,
            ordering_key,
        };
        state.messages.push(message.clone());

        let targets = state.subscriptions.clone();
        for name in &targets {
            if let Some(sub) = self.subscriptions.get_mut(name) {
                sub.backlog.push_back(Pending {
                    message: message.clone(),
                    attempts: 0,
                });
            }
        }

        Ok((message_id, targets))
    }
}

/// Broker that lives entirely in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: SharedState,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed redelivery delay instead of the subscription's backoff.
    #[must_use]
    pub fn with_retry_delay(self, delay: Duration) -> Self {
        self.state.lock().retry_delay = Some(delay);
        self
    }

    // =========================================================================
    // SETUP
    // =========================================================================

    /// Create a topic out of band.
    pub fn add_topic(&self, name: &str) {
        self.state.lock().topics.entry(name.to_string()).or_default();
    }

    /// Create a subscription out of band. The topic must already exist.
    pub fn add_subscription(&self, name: &str, topic: &str, settings: SubscriptionSettings) {
        let mut state = self.state.lock();
        if let Some(topic_state) = state.topics.get_mut(topic) {
            topic_state.subscriptions.push(name.to_string());
            state
                .subscriptions
                .insert(name.to_string(), SubscriptionState::new(topic, settings));
        }
    }

    /// Publish bytes directly, bypassing the envelope codec.
    pub async fn publish_raw(
        &self,
        topic: &str,
        data: Vec<u8>,
        attributes: BTreeMap<String, String>,
    ) -> Result<MessageId, GatewayError> {
        let mut state = self.state.lock();
        let (message_id, targets) = state.append(topic, data, attributes, None)?;
        for name in targets {
            pump(&self.state, &mut state, &name);
        }
        Ok(message_id)
    }

    // =========================================================================
    // FAILURE INJECTION
    // =========================================================================

    /// Make every call fail with [`GatewayError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().faults.unavailable = unavailable;
    }

    /// Every publish to `topic` fails.
    pub fn fail_publish(&self, topic: &str) {
        self.fail_publish_after(topic, 0);
    }

    /// Publishes to `topic` succeed `successes` more times, then fail.
    pub fn fail_publish_after(&self, topic: &str, successes: usize) {
        self.state
            .lock()
            .faults
            .publish
            .insert(topic.to_string(), successes);
    }

    pub fn fail_flush(&self, topic: &str) {
        self.state.lock().faults.flush.insert(topic.to_string());
    }

    pub fn fail_close(&self, subscription: &str) {
        self.state.lock().faults.close.insert(subscription.to_string());
    }

    /// Simulate another process creating `topic` right after our existence
    /// check: the next `topic_exists` answers `false` but the topic is there.
    pub fn race_topic_creation(&self, topic: &str) {
        self.state
            .lock()
            .faults
            .racing_topics
            .insert(topic.to_string());
    }

    /// Hold every existence check for `delay` before answering.
    pub fn delay_lookups(&self, delay: Duration) {
        self.state.lock().faults.lookup_delay = Some(delay);
    }

    async fn lookup_pause(&self) {
        let delay = self.state.lock().faults.lookup_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn has_topic(&self, name: &str) -> bool {
        self.state.lock().topics.contains_key(name)
    }

    pub fn has_subscription(&self, name: &str) -> bool {
        self.state.lock().subscriptions.contains_key(name)
    }

    pub fn subscription_settings(&self, name: &str) -> Option<SubscriptionSettings> {
        self.state
            .lock()
            .subscriptions
            .get(name)
            .map(|sub| sub.settings.clone())
    }

    /// Every message ever published to `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .topics
            .get(topic)
            .map(|t| t.messages.clone())
            .unwrap_or_default()
    }

    /// Ids acknowledged on `subscription`, in acknowledgment order.
    pub fn acknowledged(&self, subscription: &str) -> Vec<MessageId> {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.acknowledged.clone())
            .unwrap_or_default()
    }

    /// Ids moved from `subscription` to its dead-letter topic.
    pub fn dead_lettered(&self, subscription: &str) -> Vec<MessageId> {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.dead_lettered.clone())
            .unwrap_or_default()
    }

    /// Messages queued or awaiting settlement on `subscription`.
    pub fn unsettled(&self, subscription: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.backlog.len() + s.outstanding + s.retrying)
            .unwrap_or(0)
    }

    /// Whether `subscription` currently has an open delivery channel.
    pub fn is_delivering(&self, subscription: &str) -> bool {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .is_some_and(|s| s.sender.as_ref().is_some_and(|tx| !tx.is_closed()))
    }

    pub fn topic_exists_calls(&self) -> usize {
        self.state.lock().counters.topic_exists
    }

    pub fn subscription_exists_calls(&self) -> usize {
        self.state.lock().counters.subscription_exists
    }

    pub fn create_topic_calls(&self) -> usize {
        self.state.lock().counters.create_topic
    }

    pub fn create_subscription_calls(&self) -> usize {
        self.state.lock().counters.create_subscription
    }

    pub fn flush_calls(&self) -> usize {
        self.state.lock().counters.flush
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().counters.close
    }

    /// Publish attempts against `topic`, failed ones included.
    pub fn publish_calls(&self, topic: &str) -> usize {
        self.state
            .lock()
            .counters
            .publish
            .get(topic)
            .copied()
            .unwrap_or(0)
    }
}

/// Lease deliverable backlog entries of `name` to its open channel, up to
/// the channel's outstanding limit.
fn pump(shared: &SharedState, state: &mut BrokerState, name: &str) {
    let Some(sub) = state.subscriptions.get_mut(name) else {
        return;
    };
    let Some(sender) = sub.sender.clone() else {
        return;
    };

    let mut index = 0;
    while index < sub.backlog.len() && sub.outstanding < sub.max_outstanding {
        let blocked = sub.backlog[index]
            .message
            .ordering_key
            .as_ref()
            .is_some_and(|key| sub.busy_keys.contains(key));
        if blocked {
            index += 1;
            continue;
        }

        let Some(mut pending) = sub.backlog.remove(index) else {
            break;
        };
        pending.attempts += 1;

        let (delivery, settled) = Delivery::new(
            pending.message.message_id.clone(),
            pending.message.data.clone(),
            pending.message.attributes.clone(),
            pending.attempts,
        );
        if let Err(e) = sender.try_send(delivery) {
            // Keep the message for later; a closed channel is forgotten
            pending.attempts -= 1;
            sub.backlog.insert(index, pending);
            if matches!(e, mpsc::error::TrySendError::Closed(_)) {
                sub.sender = None;
            }
            return;
        }

        if let Some(key) = &pending.message.ordering_key {
            sub.busy_keys.insert(key.clone());
        }
        sub.outstanding += 1;

        tokio::spawn(await_settlement(
            shared.clone(),
            name.to_string(),
            pending,
            settled,
            sub.settings.ack_deadline,
        ));
    }
}

async fn await_settlement(
    shared: SharedState,
    subscription: String,
    pending: Pending,
    settled: oneshot::Receiver<AckReply>,
    ack_deadline: Duration,
) {
    let reply = match tokio::time::timeout(ack_deadline, settled).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => AckReply::Nack,
        Err(_) => {
            debug!(
                subscription = %subscription,
                message_id = %pending.message.message_id,
                "Ack deadline expired"
            );
            AckReply::Nack
        }
    };

    if reply == AckReply::Ack {
        let mut state = shared.lock();
        if let Some(sub) = state.subscriptions.get_mut(&subscription) {
            sub.release(&pending.message);
            sub.acknowledged.push(pending.message.message_id.clone());
        }
        pump(&shared, &mut state, &subscription);
        return;
    }

    let (delay, dead_letter) = {
        let state = shared.lock();
        let Some(sub) = state.subscriptions.get(&subscription) else {
            return;
        };
        let delay = state
            .retry_delay
            .unwrap_or_else(|| sub.settings.retry_backoff.delay_after(pending.attempts));
        let exhausted = pending.attempts >= sub.settings.dead_letter.max_delivery_attempts;
        (delay, exhausted.then(|| sub.settings.dead_letter.topic.clone()))
    };

    if let Some(dead_letter_topic) = dead_letter {
        move_to_dead_letter(&shared, &subscription, pending, &dead_letter_topic);
        return;
    }

    // The lease is free during backoff; the ordering key stays held
    {
        let mut state = shared.lock();
        if let Some(sub) = state.subscriptions.get_mut(&subscription) {
            sub.release_lease();
            sub.retrying += 1;
        }
        pump(&shared, &mut state, &subscription);
    }

    tokio::time::sleep(delay).await;

    let mut state = shared.lock();
    if let Some(sub) = state.subscriptions.get_mut(&subscription) {
        sub.retrying = sub.retrying.saturating_sub(1);
        sub.release_key(&pending.message);
        sub.backlog.push_front(pending);
    }
    pump(&shared, &mut state, &subscription);
}

fn move_to_dead_letter(
    shared: &SharedState,
    subscription: &str,
    pending: Pending,
    dead_letter_topic: &str,
) {
    let mut state = shared.lock();
    if let Some(sub) = state.subscriptions.get_mut(subscription) {
        sub.release(&pending.message);
        sub.dead_lettered.push(pending.message.message_id.clone());
    }

    warn!(
        subscription = %subscription,
        message_id = %pending.message.message_id,
        attempts = pending.attempts,
        dead_letter_topic = %dead_letter_topic,
        "Delivery attempts exhausted; dead-lettering message"
    );

    let mut attributes = pending.message.attributes;
    attributes.insert(
        DEAD_LETTER_SOURCE_ATTRIBUTE.to_string(),
        subscription.to_string(),
    );

    match state.append(dead_letter_topic, pending.message.data, attributes, None) {
        Ok((_, targets)) => {
            for name in targets {
                pump(shared, &mut state, &name);
            }
        }
        Err(e) => {
            warn!(dead_letter_topic = %dead_letter_topic, error = %e, "Dead-letter topic missing; message discarded");
        }
    }

    pump(shared, &mut state, subscription);
}

#[async_trait]
impl BrokerGateway for InMemoryBroker {
    async fn topic_exists(&self, name: &str) -> Result<bool, GatewayError> {
        self.state.lock().counters.topic_exists += 1;
        self.lookup_pause().await;

        let mut state = self.state.lock();
        state.check_available()?;

        if state.faults.racing_topics.remove(name) {
            state.topics.entry(name.to_string()).or_default();
            return Ok(false);
        }
        Ok(state.topics.contains_key(name))
    }

    async fn create_topic(&self, name: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.counters.create_topic += 1;
        state.check_available()?;

        if state.topics.contains_key(name) {
            return Err(GatewayError::AlreadyExists(name.to_string()));
        }
        state.topics.insert(name.to_string(), TopicState::default());
        Ok(())
    }

    async fn topic_handle(&self, name: &str) -> Result<TopicHandle, GatewayError> {
        let state = self.state.lock();
        state.check_available()?;

        if !state.topics.contains_key(name) {
            return Err(GatewayError::NotFound(name.to_string()));
        }
        Ok(TopicHandle::new(name))
    }

    async fn publish(
        &self,
        topic: &TopicHandle,
        message: OutboundMessage,
    ) -> Result<MessageId, GatewayError> {
        let mut state = self.state.lock();
        *state
            .counters
            .publish
            .entry(topic.name().to_string())
            .or_default() += 1;
        state.check_available()?;

        if let Some(successes_left) = state.faults.publish.get_mut(topic.name()) {
            if *successes_left == 0 {
                return Err(GatewayError::Rejected(format!(
                    "publish to {} refused",
                    topic.name()
                )));
            }
            *successes_left -= 1;
        }

        let (message_id, targets) = state.append(
            topic.name(),
            message.data,
            message.attributes,
            message.ordering_key,
        )?;
        for name in targets {
            pump(&self.state, &mut state, &name);
        }
        Ok(message_id)
    }

    async fn flush(&self, topic: &TopicHandle) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.counters.flush += 1;
        state.check_available()?;

        if state.faults.flush.contains(topic.name()) {
            return Err(GatewayError::Unavailable(format!(
                "flush of {} timed out",
                topic.name()
            )));
        }
        if !state.topics.contains_key(topic.name()) {
            return Err(GatewayError::NotFound(topic.name().to_string()));
        }
        // Publishes are stored synchronously; nothing is ever buffered
        Ok(())
    }

    async fn subscription_exists(&self, name: &str) -> Result<bool, GatewayError> {
        self.state.lock().counters.subscription_exists += 1;
        self.lookup_pause().await;

        let state = self.state.lock();
        state.check_available()?;
        Ok(state.subscriptions.contains_key(name))
    }

    async fn create_subscription(
        &self,
        name: &str,
        topic: &str,
        settings: &SubscriptionSettings,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.counters.create_subscription += 1;
        state.check_available()?;

        if state.subscriptions.contains_key(name) {
            return Err(GatewayError::AlreadyExists(name.to_string()));
        }
        let topic_state = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| GatewayError::NotFound(topic.to_string()))?;
        topic_state.subscriptions.push(name.to_string());
        state
            .subscriptions
            .insert(name.to_string(), SubscriptionState::new(topic, settings.clone()));
        Ok(())
    }

    async fn subscription_handle(&self, name: &str) -> Result<SubscriptionHandle, GatewayError> {
        let state = self.state.lock();
        state.check_available()?;

        let sub = state
            .subscriptions
            .get(name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))?;
        Ok(SubscriptionHandle::new(name, sub.topic.as_str())
            .with_ack_deadline(sub.settings.ack_deadline))
    }

    async fn open_delivery(
        &self,
        subscription: &SubscriptionHandle,
        max_outstanding: usize,
    ) -> Result<DeliveryChannel, GatewayError> {
        let mut state = self.state.lock();
        state.check_available()?;

        let sub = state
            .subscriptions
            .get_mut(subscription.name())
            .ok_or_else(|| GatewayError::NotFound(subscription.name().to_string()))?;

        let limit = max_outstanding.max(1);
        let (tx, rx) = mpsc::channel(limit);
        sub.sender = Some(tx);
        sub.max_outstanding = limit;
        pump(&self.state, &mut state, subscription.name());

        Ok(DeliveryChannel::new(rx))
    }

    async fn close(&self, subscription: &SubscriptionHandle) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.counters.close += 1;
        state.check_available()?;

        if state.faults.close.contains(subscription.name()) {
            return Err(GatewayError::Rejected(format!(
                "close of {} refused",
                subscription.name()
            )));
        }
        let sub = state
            .subscriptions
            .get_mut(subscription.name())
            .ok_or_else(|| GatewayError::NotFound(subscription.name().to_string()))?;
        sub.sender = None;
        Ok(())
    }
}
