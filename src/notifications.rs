//! Per-user notification queue with monotonic read state.

use crate::config::{BusConfig, OrderingPolicy};
use crate::error::{BusError, Result};
use crate::records::{decode_children, encode, sort_for_display, NotificationRecord};
use crate::store::Snapshot;
use crate::subscriptions::{Subscription, SubscriptionManager, Watch};
use crate::topic::TopicAddress;
use crate::types::{Clock, RecordId, UserId};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Notifications addressed to users, newest first.
pub struct NotificationQueue {
    manager: SubscriptionManager,
    clock: Arc<dyn Clock>,
    ordering: OrderingPolicy,
    watch_buffer: usize,
}

impl NotificationQueue {
    pub fn new(manager: SubscriptionManager, clock: Arc<dyn Clock>, config: &BusConfig) -> Self {
        Self {
            manager,
            clock,
            ordering: config.ordering,
            watch_buffer: config.watch_buffer,
        }
    }

    /// Queue an unread notification for `user`.
    pub fn send(&self, user: &UserId, payload: Value) -> Result<RecordId> {
        let topic = TopicAddress::notifications(user)?;
        let record = NotificationRecord::new(payload, self.clock.now());
        let appended = self
            .manager
            .store()
            .append(topic.path(), encode(&record)?)
            .map_err(|e| {
                warn!(%topic, error = %e, "notification send failed");
                e
            })?;
        debug!(%user, id = %appended.key, "notification sent");
        Ok(appended.key)
    }

    /// Mark one notification read.
    ///
    /// Fails with `NotFound` if `id` is not one of `user`'s notifications.
    /// Marking an already read notification succeeds and keeps its
    /// original `readAt`. Concurrent callers race on one conditional store
    /// update, so exactly one of them stamps `readAt`.
    pub fn mark_read(&self, user: &UserId, id: &RecordId) -> Result<()> {
        id.validate()?;
        let topic = TopicAddress::notifications(user)?;
        let path = topic.record_path(id)?;

        let mut fields = Map::new();
        fields.insert("read".into(), json!(true));
        fields.insert("readAt".into(), serde_json::to_value(self.clock.now())?);
        let applied = self
            .manager
            .store()
            .update_if(&path, "read", &json!(false), fields)
            .map_err(|e| match e {
                BusError::NotFound(_) => {
                    BusError::NotFound(format!("notification {id} for user {user}"))
                }
                other => other,
            })?;
        if applied {
            debug!(%user, %id, "notification marked read");
        }
        Ok(())
    }

    /// Read the full list once.
    pub fn list(&self, user: &UserId) -> Result<Vec<NotificationRecord>> {
        let topic = TopicAddress::notifications(user)?;
        let snapshot = self.manager.store().snapshot(topic.path())?;
        Ok(decode_sorted(&snapshot, user, self.ordering))
    }

    /// Deliver the full list, newest first, on every change.
    pub fn subscribe(
        &self,
        user: &UserId,
        on_list: impl Fn(&[NotificationRecord]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::notifications(user)?;
        Ok(self.manager.subscribe(topic, self.decoder(user, on_list)))
    }

    pub fn subscribe_with_errors(
        &self,
        user: &UserId,
        on_list: impl Fn(&[NotificationRecord]) + Send + Sync + 'static,
        on_error: impl Fn(&BusError) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::notifications(user)?;
        Ok(self
            .manager
            .subscribe_with_errors(topic, self.decoder(user, on_list), on_error))
    }

    /// Channel-backed subscription.
    pub fn watch(&self, user: &UserId) -> Result<Watch<Vec<NotificationRecord>>> {
        Watch::open(self.watch_buffer, |sender| {
            let errors = sender.clone();
            self.subscribe_with_errors(
                user,
                move |list: &[NotificationRecord]| sender.send(list.to_vec()),
                move |e| errors.fail(e.clone()),
            )
        })
    }

    fn decoder(
        &self,
        user: &UserId,
        on_list: impl Fn(&[NotificationRecord]) + Send + Sync + 'static,
    ) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let user = user.clone();
        let ordering = self.ordering;
        move |snapshot: &Snapshot| on_list(&decode_sorted(snapshot, &user, ordering))
    }
}

/// Number of unread notifications in a list.
pub fn unread_count(list: &[NotificationRecord]) -> usize {
    list.iter().filter(|n| !n.read).count()
}

fn decode_sorted(
    snapshot: &Snapshot,
    user: &UserId,
    ordering: OrderingPolicy,
) -> Vec<NotificationRecord> {
    let mut list: Vec<NotificationRecord> = decode_children(snapshot, user.as_str());
    sort_for_display(&mut list, ordering);
    list
}
