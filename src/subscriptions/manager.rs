//! Ref-counted topic subscriptions over a channel store.

use crate::error::BusError;
use crate::store::{ChannelStore, FeedEvent, ListenerId, Snapshot, StoreListener};
use crate::topic::TopicAddress;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::types::{ErrorCallback, SubscriberId, Subscription, UpdateCallback};

/// Internal subscriber state.
struct Subscriber {
    on_update: UpdateCallback,
    on_error: Option<ErrorCallback>,
    /// Cleared by `Subscription::cancel` before the subscriber is removed.
    active: Arc<AtomicBool>,
}

/// Serializes callbacks of one topic. Reentrant so callbacks may subscribe,
/// cancel or write back into the store.
type DeliveryLock = Arc<ReentrantMutex<()>>;

/// One open topic: a single store listener shared by all subscribers.
struct Topic {
    /// Distinguishes this opening from earlier ones of the same address.
    generation: u64,
    /// Held while any callback of this topic runs.
    delivery: DeliveryLock,
    listener: Option<ListenerId>,
    subscribers: HashMap<SubscriberId, Subscriber>,
    /// Last snapshot seen, replayed to late joiners.
    last: Option<Snapshot>,
}

struct Inner {
    store: Arc<dyn ChannelStore>,
    topics: Mutex<HashMap<TopicAddress, Topic>>,
    next_id: AtomicU64,
    next_generation: AtomicU64,
    error_handler: RwLock<Option<ErrorCallback>>,
}

impl Inner {
    fn delivery_lock(&self, key: &TopicAddress, generation: Option<u64>) -> Option<DeliveryLock> {
        let topics = self.topics.lock();
        topics
            .get(key)
            .filter(|topic| generation.map_or(true, |g| topic.generation == g))
            .map(|topic| Arc::clone(&topic.delivery))
    }

    fn dispatch(&self, key: &TopicAddress, generation: u64, event: &FeedEvent) {
        let Some(delivery) = self.delivery_lock(key, Some(generation)) else {
            return;
        };
        let _delivery = delivery.lock();
        match event {
            FeedEvent::Snapshot(snapshot) => {
                let targets: Vec<(Arc<AtomicBool>, UpdateCallback)> = {
                    let mut topics = self.topics.lock();
                    let topic = match topics.get_mut(key) {
                        Some(topic) if topic.generation == generation => topic,
                        _ => return,
                    };
                    topic.last = Some(snapshot.clone());
                    topic
                        .subscribers
                        .values()
                        .map(|s| (Arc::clone(&s.active), Arc::clone(&s.on_update)))
                        .collect()
                };
                trace!(topic = %key, children = snapshot.len(), subscribers = targets.len(), "dispatching snapshot");
                for (active, on_update) in targets {
                    if active.load(Ordering::SeqCst) {
                        on_update(snapshot);
                    }
                }
            }
            FeedEvent::Error(error) => {
                let fallback = self.error_handler.read().clone();
                let targets: Vec<(Arc<AtomicBool>, ErrorCallback)> = {
                    let topics = self.topics.lock();
                    let topic = match topics.get(key) {
                        Some(topic) if topic.generation == generation => topic,
                        _ => return,
                    };
                    topic
                        .subscribers
                        .values()
                        .filter_map(|s| {
                            s.on_error
                                .clone()
                                .or_else(|| fallback.clone())
                                .map(|cb| (Arc::clone(&s.active), cb))
                        })
                        .collect()
                };
                warn!(topic = %key, %error, "store error on topic");
                for (active, on_error) in targets {
                    if active.load(Ordering::SeqCst) {
                        on_error(error);
                    }
                }
            }
        }
    }

    /// Send the topic's last snapshot to one subscriber that just joined.
    fn replay(&self, key: &TopicAddress, active: &AtomicBool, on_update: &UpdateCallback) {
        let Some(delivery) = self.delivery_lock(key, None) else {
            return;
        };
        let _delivery = delivery.lock();
        let last = self.topics.lock().get(key).and_then(|t| t.last.clone());
        if let Some(snapshot) = last {
            if active.load(Ordering::SeqCst) {
                on_update(&snapshot);
            }
        }
    }

    /// Remove one subscriber. Waits for callbacks of the topic that are
    /// running on other threads.
    fn release(&self, key: &TopicAddress, id: SubscriberId) {
        let Some(delivery) = self.delivery_lock(key, None) else {
            return;
        };
        let detach = {
            let _delivery = delivery.lock();
            let mut topics = self.topics.lock();
            let emptied = match topics.get_mut(key) {
                Some(topic) => {
                    if topic.subscribers.remove(&id).is_none() {
                        return;
                    }
                    topic.subscribers.is_empty()
                }
                None => return,
            };
            if !emptied {
                return;
            }
            topics.remove(key).and_then(|topic| topic.listener)
        };
        if let Some(listener) = detach {
            self.store.detach(listener);
        }
        debug!(topic = %key, "topic closed");
    }
}

enum Join {
    Existing,
    Opened(u64),
}

/// Owns every live topic listener.
///
/// At most one store listener exists per distinct [`TopicAddress`]; it is
/// attached by the first subscriber and detached when the last one cancels.
#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl SubscriptionManager {
    /// Create a manager over an injected store handle.
    pub fn new(store: Arc<dyn ChannelStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                error_handler: RwLock::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.inner.store
    }

    /// Handler for errors on subscriptions that did not register their own.
    pub fn set_error_handler(&self, handler: impl Fn(&BusError) + Send + Sync + 'static) {
        *self.inner.error_handler.write() = Some(Arc::new(handler));
    }

    /// Subscribe to a topic. Errors go to the manager-wide handler.
    pub fn subscribe(
        &self,
        topic: TopicAddress,
        on_update: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> Subscription {
        self.open(topic, Arc::new(on_update), None)
    }

    /// Subscribe with a dedicated error callback.
    pub fn subscribe_with_errors(
        &self,
        topic: TopicAddress,
        on_update: impl Fn(&Snapshot) + Send + Sync + 'static,
        on_error: impl Fn(&BusError) + Send + Sync + 'static,
    ) -> Subscription {
        self.open(topic, Arc::new(on_update), Some(Arc::new(on_error)))
    }

    pub(crate) fn open(
        &self,
        topic: TopicAddress,
        on_update: UpdateCallback,
        on_error: Option<ErrorCallback>,
    ) -> Subscription {
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let active = Arc::new(AtomicBool::new(true));
        let subscriber = Subscriber {
            on_update: Arc::clone(&on_update),
            on_error,
            active: Arc::clone(&active),
        };

        let join = {
            let mut topics = self.inner.topics.lock();
            match topics.get_mut(&topic) {
                Some(existing) => {
                    existing.subscribers.insert(id, subscriber);
                    Join::Existing
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
                    let mut subscribers = HashMap::new();
                    subscribers.insert(id, subscriber);
                    topics.insert(
                        topic.clone(),
                        Topic {
                            generation,
                            delivery: Arc::new(ReentrantMutex::new(())),
                            listener: None,
                            subscribers,
                            last: None,
                        },
                    );
                    Join::Opened(generation)
                }
            }
        };

        match join {
            Join::Existing => self.inner.replay(&topic, &active, &on_update),
            Join::Opened(generation) => self.attach(&topic, generation),
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let key = topic.clone();
        Subscription::new(id, topic, active, move || {
            if let Some(inner) = weak.upgrade() {
                inner.release(&key, id);
            }
        })
    }

    /// Attach the store listener for a freshly opened topic.
    fn attach(&self, topic: &TopicAddress, generation: u64) {
        let weak = Arc::downgrade(&self.inner);
        let key = topic.clone();
        let listener: StoreListener = Arc::new(move |event: &FeedEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.dispatch(&key, generation, event);
            }
        });

        let store = &self.inner.store;
        let listener_id = match topic.query() {
            Some(query) => store.observe_query(topic.path(), query.clone(), listener),
            None => store.observe(topic.path(), listener),
        };

        // The topic may have been closed while the listener was attaching.
        let stale = {
            let mut topics = self.inner.topics.lock();
            match topics.get_mut(topic) {
                Some(open) if open.generation == generation => {
                    open.listener = Some(listener_id);
                    false
                }
                _ => true,
            }
        };
        if stale {
            store.detach(listener_id);
        } else {
            debug!(%topic, ?listener_id, "topic opened");
        }
    }

    /// Number of open topics (one store listener each).
    pub fn topic_count(&self) -> usize {
        self.inner.topics.lock().len()
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &TopicAddress) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map_or(0, |t| t.subscribers.len())
    }

    pub fn is_open(&self, topic: &TopicAddress) -> bool {
        self.inner.topics.lock().contains_key(topic)
    }

    /// Last snapshot an open topic delivered. `None` once the topic closes.
    pub fn last_snapshot(&self, topic: &TopicAddress) -> Option<Snapshot> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.last.clone())
    }
}
