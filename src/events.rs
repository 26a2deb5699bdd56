//! Typed custom events per entity.

use crate::config::{BusConfig, OrderingPolicy};
use crate::error::{BusError, Result};
use crate::records::{decode_children, encode, sort_for_display, CustomEvent};
use crate::store::Snapshot;
use crate::subscriptions::{Subscription, SubscriptionManager, Watch};
use crate::topic::TopicAddress;
use crate::types::{Clock, EntityId, RecordId};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Emits and filters application-defined events.
///
/// Subscribers name one event type and only ever see events of that type,
/// newest first. Delivery is at-least-once: treat each callback as the
/// current matching set.
pub struct EventBus {
    manager: SubscriptionManager,
    clock: Arc<dyn Clock>,
    ordering: OrderingPolicy,
    watch_buffer: usize,
}

impl EventBus {
    pub fn new(manager: SubscriptionManager, clock: Arc<dyn Clock>, config: &BusConfig) -> Self {
        Self {
            manager,
            clock,
            ordering: config.ordering,
            watch_buffer: config.watch_buffer,
        }
    }

    pub fn emit(&self, entity: &EntityId, event_type: &str, data: Value) -> Result<RecordId> {
        let topic = TopicAddress::events_of_type(entity, event_type)?;
        let event = CustomEvent::new(event_type, data, self.clock.now());
        let appended = self
            .manager
            .store()
            .append(topic.path(), encode(&event)?)
            .map_err(|e| {
                warn!(%topic, error = %e, "event emit failed");
                e
            })?;
        debug!(%entity, event_type, id = %appended.key, "event emitted");
        Ok(appended.key)
    }

    /// Deliver the events of `event_type` on `entity`.
    pub fn subscribe(
        &self,
        entity: &EntityId,
        event_type: &str,
        on_events: impl Fn(&[CustomEvent]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::events_of_type(entity, event_type)?;
        let on_update = decoder(entity, event_type, self.ordering, on_events);
        Ok(self.manager.subscribe(topic, on_update))
    }

    pub fn subscribe_with_errors(
        &self,
        entity: &EntityId,
        event_type: &str,
        on_events: impl Fn(&[CustomEvent]) + Send + Sync + 'static,
        on_error: impl Fn(&BusError) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::events_of_type(entity, event_type)?;
        let on_update = decoder(entity, event_type, self.ordering, on_events);
        Ok(self.manager.subscribe_with_errors(topic, on_update, on_error))
    }

    /// Channel-backed subscription.
    pub fn watch(&self, entity: &EntityId, event_type: &str) -> Result<Watch<Vec<CustomEvent>>> {
        Watch::open(self.watch_buffer, |sender| {
            let errors = sender.clone();
            self.subscribe_with_errors(
                entity,
                event_type,
                move |events: &[CustomEvent]| sender.send(events.to_vec()),
                move |e| errors.fail(e.clone()),
            )
        })
    }
}

/// The store query already filters by type; the check here keeps the
/// contract for stores that ignore queries.
fn decoder(
    entity: &EntityId,
    event_type: &str,
    ordering: OrderingPolicy,
    on_events: impl Fn(&[CustomEvent]) + Send + Sync + 'static,
) -> impl Fn(&Snapshot) + Send + Sync + 'static {
    let entity = entity.clone();
    let event_type = event_type.to_string();
    move |snapshot: &Snapshot| {
        let mut events: Vec<CustomEvent> = decode_children(snapshot, entity.as_str());
        events.retain(|e| e.event_type == event_type);
        sort_for_display(&mut events, ordering);
        on_events(&events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Appended, ChannelStore, ListenerId, MemoryStore, StoreListener};
    use crate::topic::{ChildQuery, StorePath};
    use crate::types::{ManualClock, Timestamp};
    use std::time::Duration;
    use parking_lot::Mutex;
    use serde_json::{json, Map};

    /// Store that ignores queries, as some backends do.
    struct QueryBlindStore(MemoryStore);

    impl ChannelStore for QueryBlindStore {
        fn write(&self, path: &StorePath, value: Value) -> Result<()> {
            self.0.write(path, value)
        }
        fn update(&self, path: &StorePath, fields: Map<String, Value>) -> Result<()> {
            self.0.update(path, fields)
        }
        fn update_if(
            &self,
            path: &StorePath,
            field: &str,
            expected: &Value,
            fields: Map<String, Value>,
        ) -> Result<bool> {
            self.0.update_if(path, field, expected, fields)
        }
        fn append(&self, path: &StorePath, value: Value) -> Result<Appended> {
            self.0.append(path, value)
        }
        fn read(&self, path: &StorePath) -> Result<Option<Value>> {
            self.0.read(path)
        }
        fn snapshot(&self, path: &StorePath) -> Result<Snapshot> {
            self.0.snapshot(path)
        }
        fn observe(&self, path: &StorePath, listener: StoreListener) -> ListenerId {
            self.0.observe(path, listener)
        }
        fn observe_query(&self, path: &StorePath, _: ChildQuery, l: StoreListener) -> ListenerId {
            self.0.observe(path, l)
        }
        fn detach(&self, id: ListenerId) {
            self.0.detach(id)
        }
    }

    fn bus_over(store: Arc<dyn ChannelStore>) -> EventBus {
        bus_with_clock(store, Arc::new(ManualClock::new(Timestamp::from_millis(0))))
    }

    fn bus_with_clock(store: Arc<dyn ChannelStore>, clock: Arc<ManualClock>) -> EventBus {
        EventBus::new(SubscriptionManager::new(store), clock, &BusConfig::default())
    }

    type Batches = Arc<Mutex<Vec<Vec<CustomEvent>>>>;

    fn collect(bus: &EventBus, entity: &EntityId, event_type: &str) -> (Batches, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sub = bus
            .subscribe(entity, event_type, move |events| sink.lock().push(events.to_vec()))
            .unwrap();
        (seen, sub)
    }

    #[test]
    fn test_subscriber_only_sees_its_type() {
        let bus = bus_over(Arc::new(MemoryStore::new()));
        let e = EntityId::from("E1");
        let (seen, _sub) = collect(&bus, &e, "comment_added");

        bus.emit(&e, "presence_changed", json!({"user": "U1"})).unwrap();
        bus.emit(&e, "comment_added", json!({"id": "c1"})).unwrap();

        for batch in seen.lock().iter() {
            assert!(batch.iter().all(|ev| ev.event_type == "comment_added"));
        }
        assert_eq!(seen.lock().last().unwrap().len(), 1);
    }

    #[test]
    fn test_filter_holds_when_store_ignores_queries() {
        let bus = bus_over(Arc::new(QueryBlindStore(MemoryStore::new())));
        let e = EntityId::from("E1");
        let (seen, _sub) = collect(&bus, &e, "comment_added");

        bus.emit(&e, "presence_changed", json!(null)).unwrap();
        bus.emit(&e, "comment_added", json!(null)).unwrap();
        bus.emit(&e, "presence_changed", json!(null)).unwrap();

        for batch in seen.lock().iter() {
            assert!(batch.iter().all(|ev| ev.event_type == "comment_added"));
        }
    }

    #[test]
    fn test_events_newest_first() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(0)));
        let bus = bus_with_clock(Arc::new(MemoryStore::new()), clock.clone());
        let e = EntityId::from("E1");
        let first = bus.emit(&e, "comment_added", json!("a")).unwrap();
        clock.advance(Duration::from_millis(10));
        let second = bus.emit(&e, "comment_added", json!("b")).unwrap();
        let (seen, _sub) = collect(&bus, &e, "comment_added");

        let ids: Vec<RecordId> = seen.lock()[0].iter().map(|ev| ev.id.clone()).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[test]
    fn test_same_time_events_keep_emission_order() {
        let bus = bus_over(Arc::new(MemoryStore::new()));
        let e = EntityId::from("E1");
        let first = bus.emit(&e, "tick", json!(1)).unwrap();
        let second = bus.emit(&e, "tick", json!(2)).unwrap();
        let (seen, _sub) = collect(&bus, &e, "tick");

        let ids: Vec<RecordId> = seen.lock()[0].iter().map(|ev| ev.id.clone()).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_empty_type_rejected() {
        let bus = bus_over(Arc::new(MemoryStore::new()));
        let result = bus.emit(&EntityId::from("E1"), "", json!(null));
        assert!(matches!(result, Err(BusError::InvalidArgument(_))));
    }

    #[test]
    fn test_type_subscriptions_share_nothing() {
        let store = Arc::new(MemoryStore::new());
        let bus = bus_over(store.clone());
        let e = EntityId::from("E1");
        let (_a, _sa) = collect(&bus, &e, "a");
        let (_b, _sb) = collect(&bus, &e, "b");
        assert_eq!(store.listener_count(), 2);
    }
}
