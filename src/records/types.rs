//! Records carried by the bus topics.
//!
//! Fields marked `#[serde(skip)]` are owned by the store (key, sequence) or
//! implied by the topic path (scope id); they are filled in on decode.

use crate::types::{EntityId, RecordId, Sequence, Timestamp, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A record decoded from a topic collection.
pub trait TopicRecord: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Fill in the store-owned key and sequence and the path scope.
    fn bind(&mut self, id: RecordId, seq: Sequence, scope: &str);

    /// Store key assigned by `bind`.
    fn key(&self) -> &RecordId;
}

/// A comment on an entity. Never mutated after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentRecord {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub entity_id: EntityId,
    #[serde(skip)]
    pub seq: Sequence,
    pub user_id: UserId,
    pub content: String,
    pub created_at: Timestamp,
}

impl CommentRecord {
    pub fn new(user_id: UserId, content: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: RecordId::default(),
            entity_id: EntityId::default(),
            seq: Sequence::default(),
            user_id,
            content: content.into(),
            created_at,
        }
    }
}

impl TopicRecord for CommentRecord {
    fn key(&self) -> &RecordId {
        &self.id
    }

    fn bind(&mut self, id: RecordId, seq: Sequence, scope: &str) {
        self.id = id;
        self.seq = seq;
        self.entity_id = EntityId::from(scope);
    }
}

/// A logged mutation of an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub entity_id: EntityId,
    #[serde(skip)]
    pub seq: Sequence,
    pub user_id: UserId,
    pub change: Value,
    pub timestamp: Timestamp,
}

impl HistoryRecord {
    pub fn new(user_id: UserId, change: Value, timestamp: Timestamp) -> Self {
        Self {
            id: RecordId::default(),
            entity_id: EntityId::default(),
            seq: Sequence::default(),
            user_id,
            change,
            timestamp,
        }
    }
}

impl TopicRecord for HistoryRecord {
    fn key(&self) -> &RecordId {
        &self.id
    }

    fn bind(&mut self, id: RecordId, seq: Sequence, scope: &str) {
        self.id = id;
        self.seq = seq;
        self.entity_id = EntityId::from(scope);
    }
}

/// A notification owned by one user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub user_id: UserId,
    #[serde(skip)]
    pub seq: Sequence,
    pub payload: Value,
    /// Only ever flips false -> true.
    pub read: bool,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<Timestamp>,
}

impl NotificationRecord {
    pub fn new(payload: Value, timestamp: Timestamp) -> Self {
        Self {
            id: RecordId::default(),
            user_id: UserId::default(),
            seq: Sequence::default(),
            payload,
            read: false,
            timestamp,
            read_at: None,
        }
    }
}

impl TopicRecord for NotificationRecord {
    fn key(&self) -> &RecordId {
        &self.id
    }

    fn bind(&mut self, id: RecordId, seq: Sequence, scope: &str) {
        self.id = id;
        self.seq = seq;
        self.user_id = UserId::from(scope);
    }
}

/// An application-defined event on an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CustomEvent {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub entity_id: EntityId,
    #[serde(skip)]
    pub seq: Sequence,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    pub timestamp: Timestamp,
}

impl CustomEvent {
    pub fn new(event_type: impl Into<String>, data: Value, timestamp: Timestamp) -> Self {
        Self {
            id: RecordId::default(),
            entity_id: EntityId::default(),
            seq: Sequence::default(),
            event_type: event_type.into(),
            data,
            timestamp,
        }
    }
}

impl TopicRecord for CustomEvent {
    fn key(&self) -> &RecordId {
        &self.id
    }

    fn bind(&mut self, id: RecordId, seq: Sequence, scope: &str) {
        self.id = id;
        self.seq = seq;
        self.entity_id = EntityId::from(scope);
    }
}

/// A collaboration session opened on an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(skip)]
    pub id: RecordId,
    #[serde(skip)]
    pub entity_id: EntityId,
    #[serde(skip)]
    pub seq: Sequence,
    pub data: Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl SessionRecord {
    pub fn new(data: Value, now: Timestamp) -> Self {
        Self {
            id: RecordId::default(),
            entity_id: EntityId::default(),
            seq: Sequence::default(),
            data,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TopicRecord for SessionRecord {
    fn key(&self) -> &RecordId {
        &self.id
    }

    fn bind(&mut self, id: RecordId, seq: Sequence, scope: &str) {
        self.id = id;
        self.seq = seq;
        self.entity_id = EntityId::from(scope);
    }
}

/// Liveness of a participant on an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Inactive,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceStatus::Active => f.write_str("active"),
            PresenceStatus::Inactive => f.write_str("inactive"),
        }
    }
}

/// The single live presence slot of `(entity, user)`. Last write wins.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    #[serde(skip)]
    pub entity_id: EntityId,
    #[serde(skip)]
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub last_seen: Timestamp,
}

impl PresenceRecord {
    pub fn is_active(&self) -> bool {
        self.status == PresenceStatus::Active
    }
}

/// Complete presence state of one entity.
pub type PresenceMap = BTreeMap<UserId, PresenceRecord>;
