//! Client-side ordering of topic snapshots.
//!
//! The store returns children in no particular order, so every snapshot is
//! sorted before it reaches a callback.

use crate::config::OrderingPolicy;
use crate::types::{Sequence, Timestamp};
use std::cmp::Ordering;

use super::types::{CommentRecord, CustomEvent, HistoryRecord, NotificationRecord, SessionRecord};

/// Records that can be placed on a timeline.
pub trait Ordered {
    /// Client wall-clock time of the record.
    fn timestamp(&self) -> Timestamp;
    /// Store-assigned insertion position.
    fn seq(&self) -> Sequence;
}

/// Newest first.
///
/// Under `OrderingPolicy::Timestamp` equal timestamps keep insertion order
/// (lower sequence first).
pub fn compare_for_display<R: Ordered>(a: &R, b: &R, policy: OrderingPolicy) -> Ordering {
    match policy {
        OrderingPolicy::Timestamp => b
            .timestamp()
            .cmp(&a.timestamp())
            .then_with(|| a.seq().cmp(&b.seq())),
        OrderingPolicy::Sequence => b.seq().cmp(&a.seq()),
    }
}

pub fn sort_for_display<R: Ordered>(records: &mut [R], policy: OrderingPolicy) {
    records.sort_by(|a, b| compare_for_display(a, b, policy));
}

macro_rules! ordered {
    ($record:ty, $time:ident) => {
        impl Ordered for $record {
            fn timestamp(&self) -> Timestamp {
                self.$time
            }

            fn seq(&self) -> Sequence {
                self.seq
            }
        }
    };
}

ordered!(CommentRecord, created_at);
ordered!(HistoryRecord, timestamp);
ordered!(NotificationRecord, timestamp);
ordered!(CustomEvent, timestamp);
ordered!(SessionRecord, created_at);

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item(i64, u64);

    impl Ordered for Item {
        fn timestamp(&self) -> Timestamp {
            Timestamp(self.0)
        }

        fn seq(&self) -> Sequence {
            Sequence(self.1)
        }
    }

    #[test]
    fn test_timestamp_desc_ties_by_insertion() {
        let mut items = vec![Item(10, 1), Item(20, 2), Item(10, 3), Item(20, 4)];
        sort_for_display(&mut items, OrderingPolicy::Timestamp);
        assert_eq!(items, vec![Item(20, 2), Item(20, 4), Item(10, 1), Item(10, 3)]);
    }

    #[test]
    fn test_sequence_policy_ignores_skewed_clocks() {
        // Writer 3 has a clock running behind.
        let mut items = vec![Item(100, 1), Item(200, 2), Item(50, 3)];
        sort_for_display(&mut items, OrderingPolicy::Sequence);
        assert_eq!(items, vec![Item(50, 3), Item(200, 2), Item(100, 1)]);
    }
}
