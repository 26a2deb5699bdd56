//! Participant presence per entity.
//!
//! Each `(entity, user)` pair has one slot at `presence/{entity}/{user}`,
//! overwritten on every status change. Callers mark themselves active when
//! they open an entity and inactive when they leave. Without a lease a
//! crashed client stays active until someone overwrites its slot; with
//! `presence_lease_ms` set, `sweep_expired` demotes slots whose last
//! heartbeat is older than the lease.

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::records::{encode, PresenceMap, PresenceRecord, PresenceStatus};
use crate::store::Snapshot;
use crate::subscriptions::{Subscription, SubscriptionManager, Watch};
use crate::topic::TopicAddress;
use crate::types::{Clock, EntityId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Tracks who is present on which entity.
pub struct PresenceTracker {
    manager: SubscriptionManager,
    clock: Arc<dyn Clock>,
    lease: Option<Duration>,
    watch_buffer: usize,
}

impl PresenceTracker {
    pub fn new(manager: SubscriptionManager, clock: Arc<dyn Clock>, config: &BusConfig) -> Self {
        Self {
            manager,
            clock,
            lease: config.presence_lease(),
            watch_buffer: config.watch_buffer,
        }
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }

    /// Overwrite the user's slot. Idempotent; the last write wins.
    pub fn set_status(
        &self,
        entity: &EntityId,
        user: &UserId,
        status: PresenceStatus,
    ) -> Result<()> {
        let path = TopicAddress::presence_slot(entity, user)?;
        let record = PresenceRecord {
            entity_id: entity.clone(),
            user_id: user.clone(),
            status,
            last_seen: self.clock.now(),
        };
        self.manager
            .store()
            .write(&path, encode(&record)?)
            .map_err(|e| {
                warn!(%path, error = %e, "presence write failed");
                e
            })?;
        debug!(%entity, %user, %status, "presence updated");
        Ok(())
    }

    /// Mark the user active on the entity.
    pub fn join(&self, entity: &EntityId, user: &UserId) -> Result<()> {
        self.set_status(entity, user, PresenceStatus::Active)
    }

    /// Mark the user inactive on the entity.
    pub fn leave(&self, entity: &EntityId, user: &UserId) -> Result<()> {
        self.set_status(entity, user, PresenceStatus::Inactive)
    }

    /// Refresh the user's lease. Same write as `join`.
    pub fn heartbeat(&self, entity: &EntityId, user: &UserId) -> Result<()> {
        self.join(entity, user)
    }

    /// Demote active users whose lease ran out. Returns who was demoted.
    ///
    /// Each candidate slot is read again right before it is demoted, so a
    /// heartbeat that landed after the scan keeps the user active. The store
    /// has no compare-and-set for whole slots; a heartbeat racing the final
    /// read and write can still be overwritten and is restored by the next
    /// heartbeat. Does nothing when no lease is configured.
    pub fn sweep_expired(&self, entity: &EntityId) -> Result<Vec<UserId>> {
        let Some(lease) = self.lease else {
            return Ok(Vec::new());
        };
        let topic = TopicAddress::presence(entity)?;
        let store = self.manager.store();
        let snapshot = store.snapshot(topic.path())?;
        let now = self.clock.now();
        let expired_at = |record: &PresenceRecord| {
            record.is_active() && record.last_seen.saturating_add(lease) <= now
        };

        let mut expired = Vec::new();
        for (user, record) in decode_presence(&snapshot, entity) {
            if !expired_at(&record) {
                continue;
            }
            let path = topic.path().child(user.as_str())?;
            let current = match store.read(&path)? {
                Some(value) => serde_json::from_value::<PresenceRecord>(value)?,
                None => continue,
            };
            if !expired_at(&current) {
                continue;
            }
            let demoted = PresenceRecord {
                status: PresenceStatus::Inactive,
                ..current
            };
            store.write(&path, encode(&demoted)?)?;
            expired.push(user);
        }
        if !expired.is_empty() {
            debug!(%entity, count = expired.len(), "expired presence swept");
        }
        Ok(expired)
    }

    /// Read the full presence map once.
    pub fn read(&self, entity: &EntityId) -> Result<PresenceMap> {
        let topic = TopicAddress::presence(entity)?;
        let snapshot = self.manager.store().snapshot(topic.path())?;
        Ok(decode_presence(&snapshot, entity))
    }

    /// Last map delivered to this entity's subscribers, if any are open.
    pub fn current(&self, entity: &EntityId) -> Option<PresenceMap> {
        let topic = TopicAddress::presence(entity).ok()?;
        let snapshot = self.manager.last_snapshot(&topic)?;
        Some(decode_presence(&snapshot, entity))
    }

    /// Deliver the complete `user -> presence` map on every change.
    pub fn subscribe(
        &self,
        entity: &EntityId,
        on_presence: impl Fn(&PresenceMap) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::presence(entity)?;
        Ok(self.manager.subscribe(topic, self.decoder(entity, on_presence)))
    }

    pub fn subscribe_with_errors(
        &self,
        entity: &EntityId,
        on_presence: impl Fn(&PresenceMap) + Send + Sync + 'static,
        on_error: impl Fn(&BusError) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        let topic = TopicAddress::presence(entity)?;
        Ok(self
            .manager
            .subscribe_with_errors(topic, self.decoder(entity, on_presence), on_error))
    }

    /// Channel-backed subscription.
    pub fn watch(&self, entity: &EntityId) -> Result<Watch<PresenceMap>> {
        Watch::open(self.watch_buffer, |sender| {
            let errors = sender.clone();
            self.subscribe_with_errors(
                entity,
                move |map: &PresenceMap| sender.send(map.clone()),
                move |e| errors.fail(e.clone()),
            )
        })
    }

    fn decoder(
        &self,
        entity: &EntityId,
        on_presence: impl Fn(&PresenceMap) + Send + Sync + 'static,
    ) -> impl Fn(&Snapshot) + Send + Sync + 'static {
        let entity = entity.clone();
        move |snapshot: &Snapshot| on_presence(&decode_presence(snapshot, &entity))
    }
}

/// Build the presence map from a snapshot of `presence/{entity}`.
fn decode_presence(snapshot: &Snapshot, entity: &EntityId) -> PresenceMap {
    snapshot
        .children
        .iter()
        .filter_map(|child| {
            match serde_json::from_value::<PresenceRecord>(child.value.clone()) {
                Ok(mut record) => {
                    let user = UserId::from(child.key.as_str());
                    record.entity_id = entity.clone();
                    record.user_id = user.clone();
                    Some((user, record))
                }
                Err(error) => {
                    warn!(
                        path = %snapshot.path,
                        key = %child.key,
                        %error,
                        "skipping malformed presence"
                    );
                    None
                }
            }
        })
        .collect()
}
