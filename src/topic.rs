//! Topic addressing.
//!
//! Maps `(scope id, topic kind)` to the store path holding that topic's
//! children. Everything here is pure.

use crate::error::{BusError, Result};
use crate::types::{validate_segment, EntityId, RecordId, UserId};
use serde_json::Value;
use std::fmt;

/// The logical channels carried by the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Comments,
    Presence,
    History,
    Notifications,
    Events,
    Collaborations,
}

impl TopicKind {
    /// Root path segment for this kind.
    pub fn root(self) -> &'static str {
        match self {
            TopicKind::Comments => "comments",
            TopicKind::Presence => "presence",
            TopicKind::History => "history",
            TopicKind::Notifications => "notifications",
            TopicKind::Events => "events",
            TopicKind::Collaborations => "collaborations",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.root())
    }
}

/// Slash-separated path into the channel store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorePath(String);

impl StorePath {
    /// Build a path from already validated segments.
    pub(crate) fn from_segments(segments: &[&str]) -> Self {
        StorePath(segments.join("/"))
    }

    /// Parse a path, validating every segment.
    pub fn parse(path: &str) -> Result<Self> {
        for segment in path.split('/') {
            validate_segment(segment, "path segment")?;
        }
        Ok(StorePath(path.to_string()))
    }

    /// Append one validated segment.
    pub fn child(&self, segment: &str) -> Result<Self> {
        validate_segment(segment, "path segment")?;
        Ok(StorePath(format!("{}/{}", self.0, segment)))
    }

    /// Everything before the last segment, if there is more than one.
    pub fn parent(&self) -> Option<StorePath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| StorePath(parent.to_string()))
    }

    /// The last segment.
    pub fn leaf(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, leaf)| leaf)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StorePath({})", self.0)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Predicate over the children of a collection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChildQuery {
    /// Children that are objects whose `field` equals `value`.
    FieldEquals { field: String, value: String },
}

impl ChildQuery {
    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        ChildQuery::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, child: &Value) -> bool {
        match self {
            ChildQuery::FieldEquals { field, value } => {
                child.get(field).and_then(Value::as_str) == Some(value.as_str())
            }
        }
    }
}

/// A fully qualified topic: one collection, optionally narrowed by a query.
///
/// Two subscriptions share a store listener exactly when their addresses
/// are equal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopicAddress {
    kind: TopicKind,
    path: StorePath,
    query: Option<ChildQuery>,
}

impl TopicAddress {
    fn scoped(kind: TopicKind, scope: &str) -> Result<Self> {
        validate_segment(scope, "scope id")?;
        Ok(Self {
            kind,
            path: StorePath::from_segments(&[kind.root(), scope]),
            query: None,
        })
    }

    pub fn comments(entity: &EntityId) -> Result<Self> {
        entity.validate()?;
        Self::scoped(TopicKind::Comments, entity.as_str())
    }

    pub fn presence(entity: &EntityId) -> Result<Self> {
        entity.validate()?;
        Self::scoped(TopicKind::Presence, entity.as_str())
    }

    pub fn history(entity: &EntityId) -> Result<Self> {
        entity.validate()?;
        Self::scoped(TopicKind::History, entity.as_str())
    }

    pub fn notifications(user: &UserId) -> Result<Self> {
        user.validate()?;
        Self::scoped(TopicKind::Notifications, user.as_str())
    }

    pub fn events(entity: &EntityId) -> Result<Self> {
        entity.validate()?;
        Self::scoped(TopicKind::Events, entity.as_str())
    }

    /// Events of a single type.
    pub fn events_of_type(entity: &EntityId, event_type: &str) -> Result<Self> {
        if event_type.is_empty() {
            return Err(BusError::InvalidArgument(
                "event type must not be empty".into(),
            ));
        }
        Ok(Self::events(entity)?.with_query(ChildQuery::field_equals("type", event_type)))
    }

    pub fn collaborations(entity: &EntityId) -> Result<Self> {
        entity.validate()?;
        Self::scoped(TopicKind::Collaborations, entity.as_str())
    }

    pub fn with_query(mut self, query: ChildQuery) -> Self {
        self.query = Some(query);
        self
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    pub fn query(&self) -> Option<&ChildQuery> {
        self.query.as_ref()
    }

    /// Path of one child record in this topic's collection.
    pub fn record_path(&self, id: &RecordId) -> Result<StorePath> {
        self.path.child(id.as_str())
    }

    /// Path of the presence slot `presence/{entity}/{user}`.
    pub fn presence_slot(entity: &EntityId, user: &UserId) -> Result<StorePath> {
        user.validate()?;
        Self::presence(entity)?.path.child(user.as_str())
    }
}

impl fmt::Display for TopicAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.query {
            None => write!(f, "{}", self.path),
            Some(ChildQuery::FieldEquals { field, value }) => {
                write!(f, "{}?{}={}", self.path, field, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_paths() {
        let e = EntityId::from("E1");
        let u = UserId::from("U1");
        assert_eq!(TopicAddress::comments(&e).unwrap().path().as_str(), "comments/E1");
        assert_eq!(TopicAddress::history(&e).unwrap().path().as_str(), "history/E1");
        assert_eq!(TopicAddress::events(&e).unwrap().path().as_str(), "events/E1");
        assert_eq!(
            TopicAddress::notifications(&u).unwrap().path().as_str(),
            "notifications/U1"
        );
        assert_eq!(
            TopicAddress::presence_slot(&e, &u).unwrap().as_str(),
            "presence/E1/U1"
        );
        assert_eq!(
            TopicAddress::collaborations(&e).unwrap().path().as_str(),
            "collaborations/E1"
        );
    }

    #[test]
    fn test_empty_scope_rejected() {
        let result = TopicAddress::comments(&EntityId::from(""));
        assert!(matches!(result, Err(BusError::InvalidArgument(_))));
    }

    #[test]
    fn test_query_distinguishes_topics() {
        let e = EntityId::from("E1");
        let a = TopicAddress::events_of_type(&e, "comment_added").unwrap();
        let b = TopicAddress::events_of_type(&e, "presence_changed").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.path(), b.path());
        assert_eq!(a.to_string(), "events/E1?type=comment_added");
    }

    #[test]
    fn test_path_parent_and_leaf() {
        let path = StorePath::parse("presence/E1/U1").unwrap();
        assert_eq!(path.leaf(), "U1");
        assert_eq!(path.parent().unwrap().as_str(), "presence/E1");
        assert!(StorePath::parse("presence//U1").is_err());
    }

    #[test]
    fn test_query_matches_string_field() {
        let query = ChildQuery::field_equals("type", "comment_added");
        assert!(query.matches(&json!({"type": "comment_added", "data": 1})));
        assert!(!query.matches(&json!({"type": "presence_changed"})));
        assert!(!query.matches(&json!("comment_added")));
    }
}
