//! Bus configuration.

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How ordered topics sort their snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Newest client timestamp first; equal timestamps in insertion order.
    #[default]
    Timestamp,
    /// Newest store sequence first. Ignores client clock skew.
    Sequence,
}

/// Bus configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Sort order for comments, history and notifications.
    pub ordering: OrderingPolicy,

    /// Presence lease in milliseconds (None = presence never expires).
    pub presence_lease_ms: Option<u64>,

    /// Max buffered updates per `Watch` before it is dropped.
    /// Default: 64
    pub watch_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingPolicy::Timestamp,
            presence_lease_ms: None,
            watch_buffer: 64,
        }
    }
}

impl BusConfig {
    /// Parse a JSON configuration document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: BusConfig = serde_json::from_str(json)
            .map_err(|e| BusError::InvalidArgument(format!("bad bus config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.watch_buffer == 0 {
            return Err(BusError::InvalidArgument(
                "watch_buffer must be at least 1".into(),
            ));
        }
        if self.presence_lease_ms == Some(0) {
            return Err(BusError::InvalidArgument(
                "presence_lease_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn presence_lease(&self) -> Option<Duration> {
        self.presence_lease_ms.map(Duration::from_millis)
    }
}
