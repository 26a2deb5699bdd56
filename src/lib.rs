//! # Collab Bus
//!
//! A real-time collaboration bus over a keyed, hierarchical store.
//!
//! ## Core Concepts
//!
//! - **Topics**: Per-entity channels (comments, presence, history, events,
//!   sessions) and per-user notifications, each mapped to a store path
//! - **Subscriptions**: Ref-counted; one store listener per topic no matter
//!   how many observers, detached when the last one cancels
//! - **Snapshots**: Every update delivers the complete current state,
//!   decoded and sorted for display
//! - **Presence**: Last-write-wins status per participant, with an opt-in
//!   lease
//!
//! ## Example
//!
//! ```ignore
//! use collab_bus::{BusConfig, CollabBus, EntityId, MemoryStore, UserId};
//! use std::sync::Arc;
//!
//! let bus = CollabBus::new(Arc::new(MemoryStore::new()), BusConfig::default())?;
//! let entity = EntityId::from("note-1");
//!
//! // Watch comments, newest first
//! let sub = bus.comments().subscribe(&entity, |comments| {
//!     println!("{} comments", comments.len());
//! })?;
//!
//! bus.comments().post(&entity, &UserId::from("alice"), "Looks good")?;
//! bus.presence().join(&entity, &UserId::from("alice"))?;
//!
//! // Detaches the store listener
//! sub.cancel();
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod notifications;
pub mod presence;
pub mod records;
pub mod sessions;
pub mod store;
pub mod streams;
pub mod subscriptions;
pub mod topic;
pub mod types;

// Re-exports
pub use bus::CollabBus;
pub use config::{BusConfig, OrderingPolicy};
pub use error::{BusError, Result};
pub use events::EventBus;
pub use notifications::{unread_count, NotificationQueue};
pub use presence::PresenceTracker;
pub use records::{
    CommentRecord, CustomEvent, HistoryRecord, NotificationRecord, PresenceMap, PresenceRecord,
    PresenceStatus, SessionRecord, TopicRecord,
};
pub use sessions::SessionChannel;
pub use store::{Appended, ChannelStore, Child, FeedEvent, ListenerId, MemoryStore, Snapshot};
pub use streams::{CommentStream, HistoryStream, OrderedStream, StreamDiff, StreamEntry};
pub use subscriptions::{SubscriberId, Subscription, SubscriptionManager, Watch, WatchEvent};
pub use topic::{ChildQuery, StorePath, TopicAddress, TopicKind};
pub use types::*;
