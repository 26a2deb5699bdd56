//! Property tests for stream ordering and subscription bookkeeping.

use collab_bus::{
    BusConfig, CollabBus, EntityId, ManualClock, MemoryStore, OrderingPolicy, RecordId, Timestamp,
    UserId,
};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

fn bus_with(ordering: OrderingPolicy) -> (Arc<ManualClock>, CollabBus) {
    let clock = Arc::new(ManualClock::new(Timestamp(0)));
    let config = BusConfig {
        ordering,
        ..Default::default()
    };
    let bus = CollabBus::with_clock(Arc::new(MemoryStore::new()), config, clock.clone()).unwrap();
    (clock, bus)
}

proptest! {
    #[test]
    fn prop_comments_sorted_newest_first_ties_in_append_order(
        times in prop::collection::vec(0i64..50, 1..40)
    ) {
        let (clock, bus) = bus_with(OrderingPolicy::Timestamp);
        let e = EntityId::from("E1");
        let user = UserId::from("U1");

        let mut posted: Vec<(Timestamp, RecordId)> = Vec::new();
        for (i, t) in times.iter().enumerate() {
            clock.set(Timestamp(*t));
            let id = bus.comments().post(&e, &user, &format!("c{i}")).unwrap();
            posted.push((Timestamp(*t), id));
        }

        // Stable sort keeps append order among equal timestamps
        let mut expected = posted.clone();
        expected.sort_by(|a, b| b.0.cmp(&a.0));
        let expected: Vec<RecordId> = expected.into_iter().map(|(_, id)| id).collect();

        let actual: Vec<RecordId> = bus
            .comments()
            .read(&e)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        prop_assert_eq!(&actual, &expected);

        let unique: HashSet<&RecordId> = actual.iter().collect();
        prop_assert_eq!(unique.len(), times.len());
    }

    #[test]
    fn prop_sequence_ordering_is_reverse_append_order(
        times in prop::collection::vec(-1_000i64..1_000, 1..30)
    ) {
        let (clock, bus) = bus_with(OrderingPolicy::Sequence);
        let e = EntityId::from("E1");
        let user = UserId::from("U1");

        let mut ids = Vec::new();
        for t in &times {
            clock.set(Timestamp(*t));
            ids.push(bus.comments().post(&e, &user, "x").unwrap());
        }
        ids.reverse();

        let actual: Vec<RecordId> = bus
            .comments()
            .read(&e)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        prop_assert_eq!(actual, ids);
    }

    #[test]
    fn prop_listener_detached_once_all_cancel(
        subscribers in 1usize..12,
        cancel_order in prop::collection::vec(any::<prop::sample::Index>(), 12)
    ) {
        let store = Arc::new(MemoryStore::new());
        let bus = CollabBus::new(store.clone(), BusConfig::default()).unwrap();
        let e = EntityId::from("E1");

        let mut subs: Vec<_> = (0..subscribers)
            .map(|_| bus.presence().subscribe(&e, |_| {}).unwrap())
            .collect();
        prop_assert_eq!(store.listener_count(), 1);

        for index in cancel_order.iter().take(subscribers) {
            let sub = subs.remove(index.index(subs.len()));
            sub.cancel();
            let expected = usize::from(!subs.is_empty());
            prop_assert_eq!(store.listener_count(), expected);
        }
    }
}
