//! The channel store contract.
//!
//! The bus never owns authoritative state: every write goes through a
//! [`ChannelStore`] and every read comes back as a [`Snapshot`] from it.

use crate::error::{BusError, Result};
use crate::topic::{ChildQuery, StorePath};
use crate::types::{RecordId, Sequence};
use serde_json::{Map, Value};
use std::sync::Arc;

/// One child of a collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Child {
    /// Key of the child (store-assigned for appends, caller-chosen for writes).
    pub key: RecordId,
    /// Insertion position in the collection. Stable across overwrites.
    pub seq: Sequence,
    pub value: Value,
}

/// Full current contents of a collection (or of a query over it).
///
/// Child order is unspecified; consumers sort.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub path: StorePath,
    pub children: Vec<Child>,
}

impl Snapshot {
    pub fn empty(path: StorePath) -> Self {
        Self {
            path,
            children: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, key: &RecordId) -> Option<&Child> {
        self.children.iter().find(|c| &c.key == key)
    }
}

/// Result of an append.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Appended {
    pub key: RecordId,
    pub seq: Sequence,
}

/// Handle for an attached store listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(pub u64);

/// What a store listener receives.
#[derive(Clone, Debug)]
pub enum FeedEvent {
    Snapshot(Snapshot),
    Error(BusError),
}

/// Callback attached to a store path.
pub type StoreListener = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Keyed, hierarchical, observable store.
///
/// Collections live at paths such as `comments/{entity}`; their children live
/// one segment below. Listeners observe whole collections and receive a full
/// snapshot when attached and after every change.
pub trait ChannelStore: Send + Sync {
    /// Set the child at `path`, replacing any previous value.
    fn write(&self, path: &StorePath, value: Value) -> Result<()>;

    /// Merge `fields` into the existing object child at `path`.
    ///
    /// Fails with `NotFound` if the child does not exist.
    fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()>;

    /// Merge `fields` only if the child's `field` currently equals `expected`.
    ///
    /// The check and the merge are one atomic step. Returns whether the merge
    /// happened; fails with `NotFound` if the child does not exist.
    fn update_if(
        &self,
        path: &StorePath,
        field: &str,
        expected: &Value,
        fields: Map<String, Value>,
    ) -> Result<bool>;

    /// Add a child under the collection at `path` with a fresh store key.
    fn append(&self, path: &StorePath, value: Value) -> Result<Appended>;

    /// Read one child.
    fn read(&self, path: &StorePath) -> Result<Option<Value>>;

    /// Read a whole collection once.
    fn snapshot(&self, path: &StorePath) -> Result<Snapshot>;

    /// Observe the collection at `path`. Errors arrive as `FeedEvent::Error`.
    fn observe(&self, path: &StorePath, listener: StoreListener) -> ListenerId;

    /// Observe only the children of `path` matching `query`.
    fn observe_query(
        &self,
        path: &StorePath,
        query: ChildQuery,
        listener: StoreListener,
    ) -> ListenerId;

    /// Detach a listener. Unknown ids are ignored.
    fn detach(&self, id: ListenerId);
}
