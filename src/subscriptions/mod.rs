//! Subscription system for live topic updates.
//!
//! Every component of the bus opens its topics through the
//! [`SubscriptionManager`], which:
//! - Shares one store listener between all subscribers of a topic
//! - Replays the last snapshot to subscribers joining an open topic
//! - Routes store errors to per-subscriber or manager-wide error callbacks
//! - Detaches the store listener when the last subscriber cancels
//!
//! Callbacks of one topic never run concurrently: dispatch, late-join replay
//! and cancel all take the topic's reentrant delivery lock.
//!
//! # Example
//!
//! ```ignore
//! let manager = SubscriptionManager::new(store);
//!
//! let topic = TopicAddress::comments(&EntityId::from("idea-42"))?;
//! let subscription = manager.subscribe(topic, |snapshot| {
//!     println!("{} comments", snapshot.len());
//! });
//!
//! // On teardown
//! subscription.cancel();
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    ErrorCallback, SubscriberId, Subscription, UpdateCallback, Watch, WatchEvent, WatchSender,
};
