//! Channel store abstraction and the in-memory implementation.

mod memory;
mod traits;

pub use memory::MemoryStore;
pub use traits::{
    Appended, ChannelStore, Child, FeedEvent, ListenerId, Snapshot, StoreListener,
};
