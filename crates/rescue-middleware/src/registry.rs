//! Topic registry: topic name → set of subscriber handles.
//!
//! One [`std::sync::Mutex`] protects the whole map. It is held only for the
//! map mutation itself (or for a non-blocking delivery attempt in
//! [`TopicRegistry::deliver`]) and never across an `.await`, so connections
//! never serialise on each other's I/O.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rescue_types::SubscriberId;

/// Outcome of one delivery attempt inside [`TopicRegistry::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Remove the subscriber from every topic.
    Remove,
}

/// Summary returned by [`TopicRegistry::deliver`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: Vec<SubscriberId>,
}

type TopicMap<H> = HashMap<String, HashMap<SubscriberId, H>>;

/// Thread-safe topic → subscriber-set map.
///
/// Sets are keyed by [`SubscriberId`], so subscribing twice is a no-op and
/// removal is O(1). Topics whose set becomes empty are pruned.
pub struct TopicRegistry<H> {
    topics: Mutex<TopicMap<H>>,
}

impl<H> TopicRegistry<H> {
    pub fn new() -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TopicMap<H>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `id` to `topic`'s set.
    ///
    /// Returns `false` when `id` was already subscribed; the existing handle
    /// is kept.
    pub fn subscribe(&self, topic: &str, id: SubscriberId, handle: H) -> bool {
        let mut topics = self.lock();
        let set = topics.entry(topic.to_string()).or_default();
        if set.contains_key(&id) {
            return false;
        }
        set.insert(id, handle);
        true
    }

    /// Remove `id` from `topic`'s set. Absent subscribers are not an error.
    pub fn unsubscribe(&self, topic: &str, id: &SubscriberId) -> bool {
        let mut topics = self.lock();
        let Some(set) = topics.get_mut(topic) else {
            return false;
        };
        let removed = set.remove(id).is_some();
        if set.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Remove `id` from every topic. Returns how many sets it was part of.
    pub fn remove_everywhere(&self, id: &SubscriberId) -> usize {
        let mut topics = self.lock();
        let mut removed = 0;
        topics.retain(|_, set| {
            if set.remove(id).is_some() {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    /// Offer something to every current subscriber of `topic` while the lock
    /// is held.
    ///
    /// `attempt` must not block. Subscribers for which it returns
    /// [`Delivery::Remove`] are removed from every topic before the lock is
    /// released, so no later publish can reach them.
    pub fn deliver<F>(&self, topic: &str, mut attempt: F) -> DeliveryReport
    where
        F: FnMut(&SubscriberId, &H) -> Delivery,
    {
        let mut topics = self.lock();
        let mut report = DeliveryReport::default();

        if let Some(set) = topics.get(topic) {
            for (id, handle) in set {
                match attempt(id, handle) {
                    Delivery::Delivered => report.delivered += 1,
                    Delivery::Remove => report.dropped.push(*id),
                }
            }
        }

        if !report.dropped.is_empty() {
            topics.retain(|_, set| {
                for id in &report.dropped {
                    set.remove(id);
                }
                !set.is_empty()
            });
        }

        report
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().get(topic).map_or(0, HashMap::len)
    }

    pub fn contains(&self, topic: &str, id: &SubscriberId) -> bool {
        self.lock()
            .get(topic)
            .is_some_and(|set| set.contains_key(id))
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Topics `id` is currently subscribed to, sorted.
    pub fn topics_of(&self, id: &SubscriberId) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, set)| set.contains_key(id))
            .map(|(topic, _)| topic.clone())
            .collect();
        names.sort();
        names
    }
}

impl<H: Clone> TopicRegistry<H> {
    /// Copy out the current subscribers of `topic` so the caller can perform
    /// I/O without holding the lock.
    pub fn snapshot(&self, topic: &str) -> Vec<(SubscriberId, H)> {
        self.lock()
            .get(topic)
            .map(|set| set.iter().map(|(id, h)| (*id, h.clone())).collect())
            .unwrap_or_default()
    }
}

impl<H> Default for TopicRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
