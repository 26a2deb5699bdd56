//! The bus facade: every component wired around one store.

use crate::config::BusConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::notifications::NotificationQueue;
use crate::presence::PresenceTracker;
use crate::sessions::SessionChannel;
use crate::store::ChannelStore;
use crate::streams::{CommentStream, HistoryStream};
use crate::subscriptions::SubscriptionManager;
use crate::types::{Clock, SystemClock};
use std::sync::Arc;
use tracing::info;

/// Real-time collaboration bus.
///
/// All components share one [`SubscriptionManager`], so two components
/// never hold separate listeners for the same topic.
pub struct CollabBus {
    config: BusConfig,
    manager: SubscriptionManager,
    comments: CommentStream,
    history: HistoryStream,
    presence: PresenceTracker,
    notifications: NotificationQueue,
    events: EventBus,
    sessions: SessionChannel,
}

impl CollabBus {
    /// Build a bus over `store` using the system clock.
    pub fn new(store: Arc<dyn ChannelStore>, config: BusConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build a bus with an explicit clock for record timestamps.
    pub fn with_clock(
        store: Arc<dyn ChannelStore>,
        config: BusConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let manager = SubscriptionManager::new(store);
        let bus = Self {
            comments: CommentStream::new(manager.clone(), Arc::clone(&clock), &config),
            history: HistoryStream::new(manager.clone(), Arc::clone(&clock), &config),
            presence: PresenceTracker::new(manager.clone(), Arc::clone(&clock), &config),
            notifications: NotificationQueue::new(manager.clone(), Arc::clone(&clock), &config),
            events: EventBus::new(manager.clone(), Arc::clone(&clock), &config),
            sessions: SessionChannel::new(manager.clone(), clock, &config),
            manager,
            config,
        };
        info!(
            ordering = ?bus.config.ordering,
            presence_lease_ms = ?bus.config.presence_lease_ms,
            "collaboration bus ready"
        );
        Ok(bus)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn comments(&self) -> &CommentStream {
        &self.comments
    }

    pub fn history(&self) -> &HistoryStream {
        &self.history
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn notifications(&self) -> &NotificationQueue {
        &self.notifications
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn sessions(&self) -> &SessionChannel {
        &self.sessions
    }

    /// The shared manager, for introspection and the fallback error handler.
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.manager
    }
}
