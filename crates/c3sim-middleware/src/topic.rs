//! Name-keyed, latest-value publish/subscribe topics.
//!
//! A [`TopicRegistry`] owns exactly one [`Topic`] per name for the lifetime of
//! the process.  Topics are created lazily by whichever side references them
//! first (the simulation for `odom`, the bridge for `cmd_vel`, …) and every
//! later lookup returns the same shared instance.
//!
//! Publishing overwrites the topic's latest value (no queue, no history) and
//! then synchronously invokes every subscriber in registration order.
//!
//! # Example
//!
//! ```rust
//! use c3sim_middleware::topic::TopicRegistry;
//! use serde_json::json;
//!
//! let registry = TopicRegistry::new();
//! let odom = registry.get_or_create("/juliet/odom", "nav_msgs/Odometry");
//! odom.subscribe(|msg| println!("odom: {msg}"));
//! odom.publish(json!({"pose": {}}));
//!
//! assert_eq!(odom.latest(), Some(json!({"pose": {}})));
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::debug;

/// Opaque structured payload carried by a topic.
pub type Message = Value;

/// Subscriber callback.  Invoked on the publishing thread.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking subscriber never leaves the guarded state half-written.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Topic
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TopicState {
    latest: Option<Message>,
    sequence: u64,
    subscribers: Vec<Subscriber>,
}

/// A named latest-value channel.
///
/// The type label is informational only and is never checked against the
/// payload shape.
pub struct Topic {
    name: String,
    type_label: String,
    state: Mutex<TopicState>,
}

impl Topic {
    fn new(name: String, type_label: String) -> Self {
        Self {
            name,
            type_label,
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_label(&self) -> &str {
        &self.type_label
    }

    /// Overwrite the latest value with `message` and notify every subscriber,
    /// in registration order, with the new value.
    ///
    /// The internal lock is released before any callback runs, so callbacks
    /// may freely read or publish to this or any other topic.
    pub fn publish(&self, message: Message) {
        let subscribers = {
            let mut state = lock(&self.state);
            state.latest = Some(message.clone());
            state.sequence += 1;
            state.subscribers.clone()
        };
        for subscriber in &subscribers {
            subscriber(&message);
        }
    }

    /// Append `callback` to the subscriber list.
    ///
    /// Earlier subscribers are kept; every registered callback fires on each
    /// publish.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        lock(&self.state).subscribers.push(Arc::new(callback));
    }

    /// Most recently published value, if any.
    pub fn latest(&self) -> Option<Message> {
        lock(&self.state).latest.clone()
    }

    /// Most recent value together with its publish sequence number.
    ///
    /// The sequence starts at 1 for the first publish and increments by one
    /// on every publish, so a consumer can tell a fresh message from one it
    /// has already handled.
    pub fn latest_with_sequence(&self) -> Option<(u64, Message)> {
        let state = lock(&self.state);
        state.latest.clone().map(|m| (state.sequence, m))
    }

    /// Number of publishes since creation.
    pub fn sequence(&self) -> u64 {
        lock(&self.state).sequence
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("type_label", &self.type_label)
            .field("sequence", &state.sequence)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TopicRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Shared topic store.  Clone it cheaply – all clones see the same topics.
#[derive(Clone, Default)]
pub struct TopicRegistry {
    topics: Arc<Mutex<HashMap<String, Arc<Topic>>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the topic registered under `name`, creating it on first use.
    ///
    /// Repeated calls with the same name always return the same instance.
    /// When the topic already exists its original type label is kept.
    pub fn get_or_create(&self, name: &str, type_label: &str) -> Arc<Topic> {
        let mut topics = lock(&self.topics);
        if let Some(existing) = topics.get(name) {
            if existing.type_label() != type_label {
                debug!(
                    topic = name,
                    registered = existing.type_label(),
                    requested = type_label,
                    "topic already registered with a different type label"
                );
            }
            return Arc::clone(existing);
        }
        let topic = Arc::new(Topic::new(name.to_string(), type_label.to_string()));
        topics.insert(name.to_string(), Arc::clone(&topic));
        debug!(topic = name, type_label, "topic created");
        topic
    }

    /// Look up an existing topic without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<Topic>> {
        lock(&self.topics).get(name).cloned()
    }

    /// Publish `message` on `topic`.  Equivalent to [`Topic::publish`].
    pub fn publish(&self, topic: &Topic, message: Message) {
        topic.publish(message);
    }

    /// Subscribe `callback` to `topic`.  Equivalent to [`Topic::subscribe`].
    pub fn subscribe<F>(&self, topic: &Topic, callback: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        topic.subscribe(callback);
    }

    /// Names of every registered topic, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.topics).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        lock(&self.topics).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.topic_names())
            .finish()
    }
}
