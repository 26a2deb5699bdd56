//! In-memory channel store.
//!
//! Backs tests and embedded use. Supports simulated outages so callers can
//! exercise the transient-error paths.

use crate::error::{BusError, Result};
use crate::topic::{ChildQuery, StorePath};
use crate::types::{RecordId, Sequence};
use parking_lot::{Mutex, ReentrantMutex};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::traits::{
    Appended, ChannelStore, Child, FeedEvent, ListenerId, Snapshot, StoreListener,
};

/// Children of one path, keyed by child key.
#[derive(Default)]
struct Collection {
    next_seq: Sequence,
    children: BTreeMap<RecordId, Child>,
}

impl Collection {
    fn allocate_seq(&mut self) -> Sequence {
        self.next_seq = self.next_seq.next();
        self.next_seq
    }
}

struct Listener {
    path: StorePath,
    query: Option<ChildQuery>,
    callback: StoreListener,
}

struct State {
    collections: HashMap<StorePath, Collection>,
    listeners: BTreeMap<ListenerId, Listener>,
    available: bool,
    next_key: u64,
}

impl State {
    fn snapshot_of(&self, path: &StorePath, query: Option<&ChildQuery>) -> Snapshot {
        let children = match self.collections.get(path) {
            Some(collection) => collection
                .children
                .values()
                .filter(|c| query.map_or(true, |q| q.matches(&c.value)))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        Snapshot {
            path: path.clone(),
            children,
        }
    }

    /// Fresh snapshots for every listener on `path`.
    fn deliveries_for(&self, path: &StorePath) -> Vec<(StoreListener, FeedEvent)> {
        self.listeners
            .values()
            .filter(|l| &l.path == path)
            .map(|l| {
                let snapshot = self.snapshot_of(path, l.query.as_ref());
                (l.callback.clone(), FeedEvent::Snapshot(snapshot))
            })
            .collect()
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(BusError::StoreUnavailable("memory store is offline".into()))
        }
    }
}

/// In-memory [`ChannelStore`].
///
/// Listener callbacks run on the writing thread after the data lock has been
/// released, so they may call back into the store. Dispatch is serialized by
/// a reentrant lock, which keeps snapshots for one path in write order.
pub struct MemoryStore {
    state: Mutex<State>,
    dispatch: ReentrantMutex<()>,
    next_listener: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                collections: HashMap::new(),
                listeners: BTreeMap::new(),
                available: true,
                next_key: 0,
            }),
            dispatch: ReentrantMutex::new(()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }

    /// Number of listeners attached to `path`.
    pub fn listener_count_for(&self, path: &StorePath) -> usize {
        self.state
            .lock()
            .listeners
            .values()
            .filter(|l| &l.path == path)
            .count()
    }

    pub fn is_available(&self) -> bool {
        self.state.lock().available
    }

    /// Take the store offline or bring it back.
    ///
    /// Going offline reports `StoreUnavailable` to every listener and fails
    /// all reads and writes. Coming back resends current snapshots.
    pub fn set_available(&self, available: bool) {
        let _dispatch = self.dispatch.lock();
        let deliveries: Vec<(StoreListener, FeedEvent)> = {
            let mut state = self.state.lock();
            if state.available == available {
                return;
            }
            state.available = available;
            debug!(available, "memory store availability changed");
            if available {
                state
                    .listeners
                    .values()
                    .map(|l| {
                        let snapshot = state.snapshot_of(&l.path, l.query.as_ref());
                        (l.callback.clone(), FeedEvent::Snapshot(snapshot))
                    })
                    .collect()
            } else {
                Self::error_to_all(&state, "memory store went offline")
            }
        };
        Self::deliver(deliveries);
    }

    /// Report a transient failure to every listener without going offline.
    pub fn interrupt(&self, reason: &str) {
        let _dispatch = self.dispatch.lock();
        let deliveries = Self::error_to_all(&self.state.lock(), reason);
        Self::deliver(deliveries);
    }

    fn error_to_all(state: &State, reason: &str) -> Vec<(StoreListener, FeedEvent)> {
        state
            .listeners
            .values()
            .map(|l| {
                (
                    l.callback.clone(),
                    FeedEvent::Error(BusError::StoreUnavailable(reason.to_string())),
                )
            })
            .collect()
    }

    fn deliver(deliveries: Vec<(StoreListener, FeedEvent)>) {
        for (callback, event) in deliveries {
            callback(&event);
        }
    }

    fn split(path: &StorePath) -> Result<(StorePath, RecordId)> {
        let parent = path.parent().ok_or_else(|| {
            BusError::InvalidArgument(format!("path {path} does not name a child"))
        })?;
        Ok((parent, RecordId::from(path.leaf())))
    }

    fn attach(
        &self,
        path: &StorePath,
        query: Option<ChildQuery>,
        callback: StoreListener,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        let _dispatch = self.dispatch.lock();
        let initial = {
            let mut state = self.state.lock();
            let initial = if state.available {
                FeedEvent::Snapshot(state.snapshot_of(path, query.as_ref()))
            } else {
                FeedEvent::Error(BusError::StoreUnavailable("memory store is offline".into()))
            };
            state.listeners.insert(
                id,
                Listener {
                    path: path.clone(),
                    query,
                    callback: callback.clone(),
                },
            );
            initial
        };
        trace!(?id, %path, "listener attached");
        callback(&initial);
        id
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelStore for MemoryStore {
    fn write(&self, path: &StorePath, value: Value) -> Result<()> {
        let (parent, key) = Self::split(path)?;
        let _dispatch = self.dispatch.lock();
        let deliveries = {
            let mut state = self.state.lock();
            state.ensure_available()?;
            let collection = state.collections.entry(parent.clone()).or_default();
            match collection.children.get_mut(&key) {
                Some(child) => child.value = value,
                None => {
                    let seq = collection.allocate_seq();
                    collection.children.insert(key.clone(), Child { key, seq, value });
                }
            }
            state.deliveries_for(&parent)
        };
        Self::deliver(deliveries);
        Ok(())
    }

    fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
        let (parent, key) = Self::split(path)?;
        let _dispatch = self.dispatch.lock();
        let deliveries = {
            let mut state = self.state.lock();
            state.ensure_available()?;
            let child = state
                .collections
                .get_mut(&parent)
                .and_then(|c| c.children.get_mut(&key))
                .ok_or_else(|| BusError::NotFound(path.to_string()))?;
            match child.value.as_object_mut() {
                Some(object) => object.extend(fields),
                None => {
                    return Err(BusError::InvalidArgument(format!(
                        "cannot update non-object value at {path}"
                    )))
                }
            }
            state.deliveries_for(&parent)
        };
        Self::deliver(deliveries);
        Ok(())
    }

    fn update_if(
        &self,
        path: &StorePath,
        field: &str,
        expected: &Value,
        fields: Map<String, Value>,
    ) -> Result<bool> {
        let (parent, key) = Self::split(path)?;
        let _dispatch = self.dispatch.lock();
        let deliveries = {
            let mut state = self.state.lock();
            state.ensure_available()?;
            let child = state
                .collections
                .get_mut(&parent)
                .and_then(|c| c.children.get_mut(&key))
                .ok_or_else(|| BusError::NotFound(path.to_string()))?;
            let Some(object) = child.value.as_object_mut() else {
                return Err(BusError::InvalidArgument(format!(
                    "cannot update non-object value at {path}"
                )));
            };
            if object.get(field) != Some(expected) {
                return Ok(false);
            }
            object.extend(fields);
            state.deliveries_for(&parent)
        };
        Self::deliver(deliveries);
        Ok(true)
    }

    fn append(&self, path: &StorePath, value: Value) -> Result<Appended> {
        let _dispatch = self.dispatch.lock();
        let (appended, deliveries) = {
            let mut state = self.state.lock();
            state.ensure_available()?;
            state.next_key += 1;
            let key = RecordId(format!("-{:016x}", state.next_key));
            let collection = state.collections.entry(path.clone()).or_default();
            let seq = collection.allocate_seq();
            collection.children.insert(
                key.clone(),
                Child {
                    key: key.clone(),
                    seq,
                    value,
                },
            );
            (Appended { key, seq }, state.deliveries_for(path))
        };
        Self::deliver(deliveries);
        Ok(appended)
    }

    fn read(&self, path: &StorePath) -> Result<Option<Value>> {
        let (parent, key) = Self::split(path)?;
        let state = self.state.lock();
        state.ensure_available()?;
        Ok(state
            .collections
            .get(&parent)
            .and_then(|c| c.children.get(&key))
            .map(|c| c.value.clone()))
    }

    fn snapshot(&self, path: &StorePath) -> Result<Snapshot> {
        let state = self.state.lock();
        state.ensure_available()?;
        Ok(state.snapshot_of(path, None))
    }

    fn observe(&self, path: &StorePath, listener: StoreListener) -> ListenerId {
        self.attach(path, None, listener)
    }

    fn observe_query(
        &self,
        path: &StorePath,
        query: ChildQuery,
        listener: StoreListener,
    ) -> ListenerId {
        self.attach(path, Some(query), listener)
    }

    fn detach(&self, id: ListenerId) {
        if self.state.lock().listeners.remove(&id).is_some() {
            trace!(?id, "listener detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn path(p: &str) -> StorePath {
        StorePath::parse(p).unwrap()
    }

    fn recording() -> (StoreListener, Arc<Mutex<Vec<FeedEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let listener: StoreListener = Arc::new(move |e: &FeedEvent| sink.lock().push(e.clone()));
        (listener, events)
    }

    #[test]
    fn test_append_assigns_unique_increasing_keys() {
        let store = MemoryStore::new();
        let a = store.append(&path("comments/E1"), json!({"n": 1})).unwrap();
        let b = store.append(&path("comments/E1"), json!({"n": 2})).unwrap();
        assert_ne!(a.key, b.key);
        assert!(a.key < b.key);
        assert!(a.seq < b.seq);
    }

    #[test]
    fn test_observe_delivers_initial_and_updates() {
        let store = MemoryStore::new();
        store.append(&path("comments/E1"), json!({"n": 1})).unwrap();

        let (listener, events) = recording();
        store.observe(&path("comments/E1"), listener);
        store.append(&path("comments/E1"), json!({"n": 2})).unwrap();
        store.append(&path("comments/E2"), json!({"n": 3})).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        match &events[1] {
            FeedEvent::Snapshot(s) => assert_eq!(s.len(), 2),
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_write_overwrites_and_keeps_seq() {
        let store = MemoryStore::new();
        store.write(&path("presence/E1/U1"), json!({"status": "active"})).unwrap();
        store.write(&path("presence/E1/U1"), json!({"status": "inactive"})).unwrap();

        let snapshot = store.snapshot(&path("presence/E1")).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.children[0].seq, Sequence(1));
        assert_eq!(snapshot.children[0].value["status"], "inactive");
    }

    #[test]
    fn test_update_missing_child_is_not_found() {
        let store = MemoryStore::new();
        let mut fields = Map::new();
        fields.insert("read".into(), json!(true));
        let result = store.update(&path("notifications/U1/missing"), fields);
        assert!(matches!(result, Err(BusError::NotFound(_))));
    }

    #[test]
    fn test_update_if_applies_once() {
        let store = MemoryStore::new();
        let slot = path("notifications/U1/n1");
        store.write(&slot, json!({"read": false})).unwrap();
        let (listener, events) = recording();
        store.observe(&path("notifications/U1"), listener);

        let mut first = Map::new();
        first.insert("readAt".into(), json!(1));
        first.insert("read".into(), json!(true));
        assert!(store.update_if(&slot, "read", &json!(false), first).unwrap());

        let mut second = Map::new();
        second.insert("readAt".into(), json!(2));
        assert!(!store.update_if(&slot, "read", &json!(false), second).unwrap());

        assert_eq!(store.read(&slot).unwrap(), Some(json!({"read": true, "readAt": 1})));
        // initial snapshot plus the one applied update
        assert_eq!(events.lock().len(), 2);

        let missing = store.update_if(
            &path("notifications/U1/n2"),
            "read",
            &json!(false),
            Map::new(),
        );
        assert!(matches!(missing, Err(BusError::NotFound(_))));
    }

    #[test]
    fn test_query_filters_children() {
        let store = MemoryStore::new();
        let (listener, events) = recording();
        store.observe_query(
            &path("events/E1"),
            ChildQuery::field_equals("type", "a"),
            listener,
        );
        store.append(&path("events/E1"), json!({"type": "a"})).unwrap();
        store.append(&path("events/E1"), json!({"type": "b"})).unwrap();

        let events = events.lock();
        match events.last() {
            Some(FeedEvent::Snapshot(s)) => {
                assert_eq!(s.len(), 1);
                assert_eq!(s.children[0].value["type"], "a");
            }
            other => panic!("Expected snapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_offline_store_rejects_writes_and_notifies() {
        let store = MemoryStore::new();
        let (listener, events) = recording();
        store.observe(&path("comments/E1"), listener);

        store.set_available(false);
        let result = store.append(&path("comments/E1"), json!({}));
        assert!(matches!(result, Err(BusError::StoreUnavailable(_))));
        assert!(matches!(events.lock().last(), Some(FeedEvent::Error(_))));

        store.set_available(true);
        assert!(matches!(events.lock().last(), Some(FeedEvent::Snapshot(_))));
    }

    #[test]
    fn test_detach_stops_delivery() {
        let store = MemoryStore::new();
        let (listener, events) = recording();
        let id = store.observe(&path("comments/E1"), listener);
        store.detach(id);
        store.detach(id);
        store.append(&path("comments/E1"), json!({})).unwrap();

        assert_eq!(events.lock().len(), 1);
        assert_eq!(store.listener_count(), 0);
    }

    #[test]
    fn test_listener_may_write_reentrantly() {
        let store = Arc::new(MemoryStore::new());
        let inner = Arc::clone(&store);
        let listener: StoreListener = Arc::new(move |e: &FeedEvent| {
            if let FeedEvent::Snapshot(s) = e {
                if s.len() == 1 {
                    inner.append(&path("history/E1"), json!({"echo": true})).unwrap();
                }
            }
        });
        store.observe(&path("comments/E1"), listener);
        store.append(&path("comments/E1"), json!({})).unwrap();

        assert_eq!(store.snapshot(&path("history/E1")).unwrap().len(), 1);
    }
}
