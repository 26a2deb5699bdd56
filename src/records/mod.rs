//! Topic records and their ordering.

mod ordering;
mod types;

pub use ordering::{compare_for_display, sort_for_display, Ordered};
pub use types::{
    CommentRecord, CustomEvent, HistoryRecord, NotificationRecord, PresenceMap, PresenceRecord,
    PresenceStatus, SessionRecord, TopicRecord,
};

use crate::error::{BusError, Result};
use crate::store::Snapshot;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Encode a record body for the store.
pub(crate) fn encode<R: Serialize>(record: &R) -> Result<Value> {
    serde_json::to_value(record).map_err(|e| BusError::Serialization(e.to_string()))
}

/// Decode every child of a snapshot, skipping (and logging) malformed ones.
pub(crate) fn decode_children<R: TopicRecord>(snapshot: &Snapshot, scope: &str) -> Vec<R> {
    snapshot
        .children
        .iter()
        .filter_map(|child| match serde_json::from_value::<R>(child.value.clone()) {
            Ok(mut record) => {
                record.bind(child.key.clone(), child.seq, scope);
                Some(record)
            }
            Err(error) => {
                warn!(path = %snapshot.path, key = %child.key, %error, "skipping malformed record");
                None
            }
        })
        .collect()
}
