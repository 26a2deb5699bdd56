//! Generic ordered stream over an append-only topic.

use crate::config::{BusConfig, OrderingPolicy};
use crate::error::{BusError, Result};
use crate::records::{
    decode_children, encode, sort_for_display, CommentRecord, HistoryRecord, Ordered, TopicRecord,
};
use crate::store::Snapshot;
use crate::subscriptions::{Subscription, SubscriptionManager, Watch};
use crate::topic::TopicAddress;
use crate::types::{Clock, EntityId, RecordId, UserId};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// A record that lives in an ordered per-entity stream.
pub trait StreamEntry: TopicRecord + Ordered {
    /// The topic holding this entity's records.
    fn topic(entity: &EntityId) -> Result<TopicAddress>;

    /// Check caller-supplied fields before anything is written.
    fn validate(&self) -> Result<()>;
}

impl StreamEntry for CommentRecord {
    fn topic(entity: &EntityId) -> Result<TopicAddress> {
        TopicAddress::comments(entity)
    }

    fn validate(&self) -> Result<()> {
        self.user_id.validate()
    }
}

impl StreamEntry for HistoryRecord {
    fn topic(entity: &EntityId) -> Result<TopicAddress> {
        TopicAddress::history(entity)
    }

    fn validate(&self) -> Result<()> {
        self.user_id.validate()
    }
}

/// Changes between two successive snapshots of a stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamDiff<R> {
    /// New records, in display order.
    pub added: Vec<R>,
    /// Records that disappeared from the store.
    pub removed: Vec<RecordId>,
}

impl<R> StreamDiff<R> {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Append-only, snapshot-replace stream of records per entity.
///
/// Subscribers always receive the complete sequence, newest first.
pub struct OrderedStream<R> {
    manager: SubscriptionManager,
    clock: Arc<dyn Clock>,
    ordering: OrderingPolicy,
    watch_buffer: usize,
    _record: PhantomData<fn() -> R>,
}

/// Comments on entities.
pub type CommentStream = OrderedStream<CommentRecord>;

/// Revision history of entities.
pub type HistoryStream = OrderedStream<HistoryRecord>;

impl<R: StreamEntry> OrderedStream<R> {
    pub fn new(manager: SubscriptionManager, clock: Arc<dyn Clock>, config: &BusConfig) -> Self {
        Self {
            manager,
            clock,
            ordering: config.ordering,
            watch_buffer: config.watch_buffer,
            _record: PhantomData,
        }
    }

    pub fn ordering(&self) -> OrderingPolicy {
        self.ordering
    }

    /// Append a record. The store assigns and returns its id.
    pub fn append(&self, entity: &EntityId, record: R) -> Result<RecordId> {
        let topic = R::topic(entity)?;
        record.validate()?;
        let value = encode(&record)?;
        let appended = self
            .manager
            .store()
            .append(topic.path(), value)
            .map_err(|e| {
                warn!(%topic, error = %e, "append failed");
                e
            })?;
        debug!(%topic, id = %appended.key, seq = appended.seq.0, "record appended");
        Ok(appended.key)
    }

    /// Read the current sequence once.
    pub fn read(&self, entity: &EntityId) -> Result<Vec<R>> {
        let topic = R::topic(entity)?;
        let snapshot = self.manager.store().snapshot(topic.path())?;
        Ok(self.decode(&snapshot, entity))
    }

    /// Deliver the full ordered sequence on every change.
    pub fn subscribe(
        &self,
        entity: &EntityId,
        on_snapshot: impl Fn(&[R]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = R::topic(entity)?;
        let on_update = self.decoder(entity, on_snapshot);
        Ok(self.manager.subscribe(topic, on_update))
    }

    pub fn subscribe_with_errors(
        &self,
        entity: &EntityId,
        on_snapshot: impl Fn(&[R]) + Send + Sync + 'static,
        on_error: impl Fn(&BusError) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = R::topic(entity)?;
        let on_update = self.decoder(entity, on_snapshot);
        Ok(self.manager.subscribe_with_errors(topic, on_update, on_error))
    }

    /// Deliver only what changed since the previous snapshot.
    ///
    /// The first call carries the whole current sequence as `added`; empty
    /// diffs after that are not delivered.
    pub fn subscribe_diff(
        &self,
        entity: &EntityId,
        on_diff: impl Fn(&StreamDiff<R>) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let seen: Mutex<Option<HashSet<RecordId>>> = Mutex::new(None);
        self.subscribe(entity, move |records: &[R]| {
            let diff = {
                let mut seen = seen.lock();
                let first = seen.is_none();
                let known = seen.get_or_insert_with(HashSet::new);
                let current: HashSet<RecordId> =
                    records.iter().map(|r| r.key().clone()).collect();
                let added: Vec<R> = records
                    .iter()
                    .filter(|r| !known.contains(r.key()))
                    .cloned()
                    .collect();
                let removed: Vec<RecordId> = known.difference(&current).cloned().collect();
                *known = current;
                let diff = StreamDiff { added, removed };
                if !first && diff.is_empty() {
                    return;
                }
                diff
            };
            on_diff(&diff);
        })
    }

    /// Channel-backed subscription.
    pub fn watch(&self, entity: &EntityId) -> Result<Watch<Vec<R>>> {
        Watch::open(self.watch_buffer, |sender| {
            let errors = sender.clone();
            self.subscribe_with_errors(
                entity,
                move |records: &[R]| sender.send(records.to_vec()),
                move |e| errors.fail(e.clone()),
            )
        })
    }

    fn decode(&self, snapshot: &Snapshot, entity: &EntityId) -> Vec<R> {
        decode_sorted(snapshot, entity.as_str(), self.ordering)
    }

    fn decoder(
        &self,
        entity: &EntityId,
        on_snapshot: impl Fn(&[R]) + Send + Sync + 'static,
    ) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let scope = entity.clone();
        let ordering = self.ordering;
        move |snapshot: &Snapshot| {
            let records: Vec<R> = decode_sorted(snapshot, scope.as_str(), ordering);
            on_snapshot(&records);
        }
    }
}

fn decode_sorted<R: StreamEntry>(
    snapshot: &Snapshot,
    scope: &str,
    ordering: OrderingPolicy,
) -> Vec<R> {
    let mut records: Vec<R> = decode_children(snapshot, scope);
    sort_for_display(&mut records, ordering);
    records
}

impl OrderedStream<CommentRecord> {
    /// Post a comment stamped with the current client time.
    pub fn post(&self, entity: &EntityId, user: &UserId, content: &str) -> Result<RecordId> {
        let record = CommentRecord::new(user.clone(), content, self.clock.now());
        self.append(entity, record)
    }
}

impl OrderedStream<HistoryRecord> {
    /// Record a change made by `user`.
    pub fn log_change(&self, entity: &EntityId, user: &UserId, change: Value) -> Result<RecordId> {
        let record = HistoryRecord::new(user.clone(), change, self.clock.now());
        self.append(entity, record)
    }
}
