//! Error types for the engine and its tree collaborator.
//!
//! Scheduling races (a node unmounting while work for it is queued) are not
//! errors and never show up here. What does show up is structural: the tree
//! refused a mount, replace, or re-render. Those are fatal to the engine and
//! carry a snapshot of the scheduler state taken where the failure happened.

use std::fmt;

use thiserror::Error;

/// Failure signalled by the tree/render subsystem.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The existing element has a different kind than the new one; the caller
    /// should replace it wholesale instead of patching it in place.
    #[error("element kind mismatch, replace instead of update")]
    Replace,

    /// Any other structural failure.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TreeError {
    /// Build an [`TreeError::Other`] from a message.
    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self::Other(anyhow::Error::msg(message))
    }

    /// Whether the failure asks for a wholesale replacement.
    pub fn is_replace(&self) -> bool {
        matches!(self, Self::Replace)
    }
}

/// Scheduler state captured at the point of a structural failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Events waiting in the queue.
    pub events_count: usize,
    /// Capacity of the queue.
    pub events_capacity: usize,
    /// Composers in the pending-update set.
    pub updates_count: usize,
    /// Entries in the update batch.
    pub updates_queue_len: usize,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events-count={} events-capacity={} updates-count={} updates-queue-len={}",
            self.events_count, self.events_capacity, self.updates_count, self.updates_queue_len
        )
    }
}

/// Errors surfaced by [`Engine`](crate::Engine) operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tree is in a state the engine cannot repair.
    #[error("{op} failed [{diagnostics}]")]
    Structural {
        op: &'static str,
        diagnostics: Diagnostics,
        #[source]
        source: TreeError,
    },

    /// An async worker thread could not be started.
    #[error("failed to spawn async worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn structural(
        op: &'static str,
        diagnostics: Diagnostics,
        source: TreeError,
    ) -> Self {
        Self::Structural {
            op,
            diagnostics,
            source,
        }
    }

    /// Diagnostics attached to a structural failure.
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::Structural { diagnostics, .. } => Some(diagnostics),
            Self::Spawn(_) => None,
        }
    }
}

/// Errors surfaced by [`Storage`](crate::Storage) implementations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("encoding value for key {key:?}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("decoding value for key {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage is full")]
    Full,
}
