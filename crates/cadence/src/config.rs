//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Re-render ticks per second when nothing else is configured.
pub const DEFAULT_UPDATE_RATE: u32 = 60;

/// Event queue capacity when nothing else is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Tunables for an [`Engine`](crate::Engine).
///
/// Deserializes with every field optional, so it can be embedded in a host
/// application's own config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Update flushes per second while events are arriving. `0` selects
    /// [`DEFAULT_UPDATE_RATE`].
    pub update_rate: u32,

    /// Maximum number of queued events before `dispatch` blocks.
    pub queue_capacity: usize,

    /// Tick interval used once the queue has drained.
    pub idle_interval: Duration,

    /// Interval of the message-bus garbage collection pass.
    pub prune_interval: Duration,

    /// Whether the engine renders on a server rather than in a client.
    pub runs_in_server: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_rate: DEFAULT_UPDATE_RATE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_interval: Duration::from_secs(60 * 60),
            prune_interval: Duration::from_secs(60),
            runs_in_server: false,
        }
    }
}

impl EngineConfig {
    /// Interval between update flushes under load.
    pub fn update_interval(&self) -> Duration {
        let rate = if self.update_rate == 0 {
            DEFAULT_UPDATE_RATE
        } else {
            self.update_rate
        };
        Duration::from_secs(1) / rate
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
