//! Collaboration sessions opened on an entity.

use crate::config::{BusConfig, OrderingPolicy};
use crate::error::{BusError, Result};
use crate::records::{decode_children, encode, sort_for_display, SessionRecord};
use crate::store::Snapshot;
use crate::subscriptions::{Subscription, SubscriptionManager, Watch};
use crate::topic::TopicAddress;
use crate::types::{Clock, EntityId, RecordId};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Session records under `collaborations/{entity}`.
pub struct SessionChannel {
    manager: SubscriptionManager,
    clock: Arc<dyn Clock>,
    ordering: OrderingPolicy,
    watch_buffer: usize,
}

impl SessionChannel {
    pub fn new(manager: SubscriptionManager, clock: Arc<dyn Clock>, config: &BusConfig) -> Self {
        Self {
            manager,
            clock,
            ordering: config.ordering,
            watch_buffer: config.watch_buffer,
        }
    }

    /// Open a session carrying `data`, stamped with creation time.
    pub fn create(&self, entity: &EntityId, data: Value) -> Result<RecordId> {
        let topic = TopicAddress::collaborations(entity)?;
        let record = SessionRecord::new(data, self.clock.now());
        let appended = self.manager.store().append(topic.path(), encode(&record)?)?;
        debug!(%entity, id = %appended.key, "collaboration session created");
        Ok(appended.key)
    }

    /// Read the entity's sessions once, newest first.
    pub fn read(&self, entity: &EntityId) -> Result<Vec<SessionRecord>> {
        let topic = TopicAddress::collaborations(entity)?;
        let snapshot = self.manager.store().snapshot(topic.path())?;
        let mut sessions: Vec<SessionRecord> = decode_children(&snapshot, entity.as_str());
        sort_for_display(&mut sessions, self.ordering);
        Ok(sessions)
    }

    /// Deliver the entity's sessions, newest first. Snapshots with no
    /// sessions are not delivered.
    pub fn subscribe(
        &self,
        entity: &EntityId,
        on_sessions: impl Fn(&[SessionRecord]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::collaborations(entity)?;
        Ok(self.manager.subscribe(topic, self.decoder(entity, on_sessions)))
    }

    pub fn subscribe_with_errors(
        &self,
        entity: &EntityId,
        on_sessions: impl Fn(&[SessionRecord]) + Send + Sync + 'static,
        on_error: impl Fn(&BusError) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::collaborations(entity)?;
        Ok(self
            .manager
            .subscribe_with_errors(topic, self.decoder(entity, on_sessions), on_error))
    }

    /// Channel-backed subscription.
    pub fn watch(&self, entity: &EntityId) -> Result<Watch<Vec<SessionRecord>>> {
        Watch::open(self.watch_buffer, |sender| {
            let errors = sender.clone();
            self.subscribe_with_errors(
                entity,
                move |sessions: &[SessionRecord]| sender.send(sessions.to_vec()),
                move |e| errors.fail(e.clone()),
            )
        })
    }

    fn decoder(
        &self,
        entity: &EntityId,
        on_sessions: impl Fn(&[SessionRecord]) + Send + Sync + 'static,
    ) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let entity = entity.clone();
        let ordering = self.ordering;
        move |snapshot: &Snapshot| {
            if snapshot.is_empty() {
                return;
            }
            let mut sessions: Vec<SessionRecord> = decode_children(snapshot, entity.as_str());
            sort_for_display(&mut sessions, ordering);
            on_sessions(&sessions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{ManualClock, Timestamp};
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_sessions_delivered_only_when_present() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(7)));
        let sessions = SessionChannel::new(
            SubscriptionManager::new(store),
            clock,
            &BusConfig::default(),
        );
        let e = EntityId::from("E1");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = sessions
            .subscribe(&e, move |list| sink.lock().push(list.to_vec()))
            .unwrap();
        assert!(seen.lock().is_empty());

        let id = sessions.create(&e, json!({"title": "brainstorm"})).unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].id, id);
        assert_eq!(seen[0][0].entity_id, e);
        assert_eq!(seen[0][0].created_at, Timestamp::from_millis(7));
        assert_eq!(seen[0][0].updated_at, seen[0][0].created_at);
        assert_eq!(seen[0][0].data["title"], "brainstorm");
    }

    #[test]
    fn test_read_newest_first() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let sessions = SessionChannel::new(
            SubscriptionManager::new(store),
            clock.clone(),
            &BusConfig::default(),
        );
        let e = EntityId::from("E1");
        assert!(sessions.read(&e).unwrap().is_empty());

        let first = sessions.create(&e, json!(1)).unwrap();
        clock.advance(std::time::Duration::from_millis(3));
        let second = sessions.create(&e, json!(2)).unwrap();

        let ids: Vec<RecordId> = sessions.read(&e).unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_empty_entity_rejected() {
        let sessions = SessionChannel::new(
            SubscriptionManager::new(Arc::new(MemoryStore::new())),
            Arc::new(ManualClock::new(Timestamp::from_millis(0))),
            &BusConfig::default(),
        );
        let result = sessions.create(&EntityId::from(""), json!({}));
        assert!(matches!(result, Err(BusError::InvalidArgument(_))));
    }
}
