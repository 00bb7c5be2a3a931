// Topic-based event bus with last-value discovery.
//
// Every cross-component message in the engine travels over this bus as a
// JSON payload keyed by a string topic (see `topics`). Two concerns are kept
// deliberately separate:
//
// - **Delivery.** `subscribe()` hands out a `SubscriptionId`; `publish()`
//   queues one `Delivery` per live subscription on the topic. The engine
//   drains the queue synchronously inside the tick that produced the
//   messages (see engine.rs), so delivery order equals publish order.
// - **Last value.** `publish()` also records the payload as the topic's
//   latest value. Late joiners query it explicitly with `last_value()` /
//   `last_message()`; subscribing never replays it.
//
// Subscribers are identified by id rather than closure. Whoever owns the id
// (a binding, usually) is looked up by the engine when the delivery is
// dispatched. A delivery whose subscription was cancelled after it was queued
// is dropped on pop, which is what makes removal take effect "on the next
// value".

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::warn;

/// JSON payload carried by every message.
pub type Payload = serde_json::Value;

/// Handle for one live subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// A message queued for one subscriber.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub subscription: SubscriptionId,
    pub topic: String,
    pub payload: Payload,
}

/// Topic names used across the engine.
pub mod topics {
    pub const CLOCK_TICK: &str = "clock:tick";
    pub const CONTEXT_POOL: &str = "context:pool";
    pub const CONTEXT_MOOD: &str = "context:mood";
    pub const CONTEXT_DENSITY: &str = "context:density";
    pub const MUSIC_CHORD: &str = "music:chord";
    pub const MUSIC_NEXT_CHORD: &str = "music:nextChord";
    pub const DATA_LOOKAHEAD: &str = "data:lookahead";
    pub const BINDING_REGISTER: &str = "whip:binding:register";
    pub const BINDING_REMOVE: &str = "whip:binding:remove";

    /// `playhead:<vizId>:<playheadId>:value`
    pub fn playhead_value(visualization_id: &str, playhead_id: &str) -> String {
        format!("playhead:{visualization_id}:{playhead_id}:value")
    }

    /// `data:lookahead:<playheadId>`
    pub fn lookahead_for(playhead_id: &str) -> String {
        format!("{DATA_LOOKAHEAD}:{playhead_id}")
    }
}

#[derive(Debug, Default)]
pub struct EventBus {
    /// Live subscriptions and the topic each one listens to.
    subscriptions: BTreeMap<SubscriptionId, String>,
    by_topic: BTreeMap<String, BTreeSet<SubscriptionId>>,
    last_values: BTreeMap<String, Payload>,
    pending: VecDeque<Delivery>,
    next_subscription: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start listening to `topic`.
    pub fn subscribe(&mut self, topic: &str) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscriptions.insert(id, topic.to_string());
        self.by_topic.entry(topic.to_string()).or_default().insert(id);
        id
    }

    /// Cancel a subscription. Returns false if it was not live.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let Some(topic) = self.subscriptions.remove(&id) else {
            return false;
        };
        if let Some(set) = self.by_topic.get_mut(&topic) {
            set.remove(&id);
            if set.is_empty() {
                self.by_topic.remove(&topic);
            }
        }
        true
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.by_topic.get(topic).map_or(0, BTreeSet::len)
    }

    /// Total live subscriptions across all topics.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Record `payload` as the topic's last value and queue it for every
    /// subscriber. Returns the number of deliveries queued.
    pub fn publish(&mut self, topic: &str, payload: Payload) -> usize {
        let mut queued = 0;
        if let Some(subs) = self.by_topic.get(topic) {
            for &subscription in subs {
                self.pending.push_back(Delivery {
                    subscription,
                    topic: topic.to_string(),
                    payload: payload.clone(),
                });
                queued += 1;
            }
        }
        self.last_values.insert(topic.to_string(), payload);
        queued
    }

    /// Serialize and publish a typed message. Serialization failures are
    /// logged and the message is dropped.
    pub fn publish_message<T: Serialize>(&mut self, topic: &str, message: &T) -> usize {
        match serde_json::to_value(message) {
            Ok(payload) => self.publish(topic, payload),
            Err(e) => {
                warn!(topic, error = %e, "dropping unserializable message");
                0
            }
        }
    }

    /// Pop the next delivery whose subscription is still live.
    pub fn pop_delivery(&mut self) -> Option<Delivery> {
        while let Some(delivery) = self.pending.pop_front() {
            if self.subscriptions.contains_key(&delivery.subscription) {
                return Some(delivery);
            }
        }
        None
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// The most recent payload published on `topic`, if any.
    pub fn last_value(&self, topic: &str) -> Option<&Payload> {
        self.last_values.get(topic)
    }

    /// The most recent payload on `topic` decoded as `T`. A payload that
    /// does not match `T` reads as absent.
    pub fn last_message<T: DeserializeOwned>(&self, topic: &str) -> Option<T> {
        let payload = self.last_values.get(topic)?;
        serde_json::from_value(payload.clone()).ok()
    }
}
