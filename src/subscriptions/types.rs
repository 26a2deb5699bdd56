//! Subscription handles and callback types.

use crate::error::{BusError, Result};
use crate::store::Snapshot;
use crate::topic::TopicAddress;
use crossbeam_channel::{
    bounded, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Receives the full current snapshot of a topic.
pub type UpdateCallback = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Receives store errors for a topic.
pub type ErrorCallback = Arc<dyn Fn(&BusError) + Send + Sync>;

/// Unique identifier for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub u64);

type Release = Box<dyn FnOnce() + Send>;

/// Cancellation handle for one subscriber.
///
/// `cancel` is idempotent and never fails, even after the underlying topic
/// has been torn down. Dropping the handle cancels it.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    id: SubscriberId,
    topic: TopicAddress,
    active: Arc<AtomicBool>,
    release: Mutex<Option<Release>>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriberId,
        topic: TopicAddress,
        active: Arc<AtomicBool>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id,
            topic,
            active,
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &TopicAddress {
        &self.topic
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop receiving updates. No callback of this subscriber runs after
    /// this returns.
    ///
    /// If a callback of the same topic is running on another thread, this
    /// blocks until it returns. Cancelling from inside a callback does not
    /// block.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Events delivered through a [`Watch`].
#[derive(Clone, Debug)]
pub enum WatchEvent<T> {
    Update(T),
    Error(BusError),
}

/// Sending half handed to a subscribe call by [`Watch::open`].
pub struct WatchSender<T> {
    sender: Sender<WatchEvent<T>>,
    dropped: Arc<AtomicBool>,
}

impl<T> Clone for WatchSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> WatchSender<T> {
    pub fn send(&self, value: T) {
        self.push(WatchEvent::Update(value));
    }

    pub fn fail(&self, error: BusError) {
        self.push(WatchEvent::Error(error));
    }

    /// Once the buffer overflows the watcher is dropped and receives nothing
    /// further.
    fn push(&self, event: WatchEvent<T>) {
        if self.dropped.load(Ordering::SeqCst) {
            return;
        }
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("watch buffer overflowed, dropping watcher");
                self.dropped.store(true, Ordering::SeqCst);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.store(true, Ordering::SeqCst);
            }
        }
    }
}

/// A subscription that owns a bounded channel instead of a callback.
///
/// Cancelling (or dropping) the watch closes the subscription; the receiver
/// then only yields what was already buffered.
pub struct Watch<T> {
    receiver: Receiver<WatchEvent<T>>,
    dropped: Arc<AtomicBool>,
    subscription: Subscription,
}

impl<T> Watch<T> {
    /// Create a channel of `buffer` slots and let `subscribe` wire a
    /// callback subscription into it.
    pub fn open<F>(buffer: usize, subscribe: F) -> Result<Self>
    where
        F: FnOnce(WatchSender<T>) -> Result<Subscription>,
    {
        let (sender, receiver) = bounded(buffer.max(1));
        let dropped = Arc::new(AtomicBool::new(false));
        let subscription = subscribe(WatchSender {
            sender,
            dropped: Arc::clone(&dropped),
        })?;
        Ok(Self {
            receiver,
            dropped,
            subscription,
        })
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<WatchEvent<T>, RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<WatchEvent<T>, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<WatchEvent<T>, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Most recent buffered update, discarding older ones.
    pub fn latest(&self) -> Option<T> {
        let mut latest = None;
        while let Ok(event) = self.receiver.try_recv() {
            if let WatchEvent::Update(value) = event {
                latest = Some(value);
            }
        }
        latest
    }

    /// True once the buffer has overflowed.
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn cancel(&self) {
        self.subscription.cancel();
    }
}
