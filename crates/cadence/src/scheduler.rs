//! Batched, deduplicated, root-first component updates.
//!
//! ```text
//! schedule(node) ──► nearest enclosing composer C
//!                      ├─ C pending?  ──► no-op
//!                      └─ otherwise   ──► pending += C, batch += (C, hops(C → root) + 1)
//!
//! flush() ──► sort batch by priority (root-closest first)
//!               └─ for each entry: unmounted? drop │ resolved? skip │ update_root()
//! ```
//!
//! Parents re-render before their descendants, so a descendant that the
//! parent's pass replaced or unmounted is skipped instead of re-rendered for
//! nothing.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::trace;

use crate::error::TreeError;
use crate::node::{ancestors, upgrade_mounted, NodeId, NodeRef, WeakNode};

#[derive(Debug)]
struct ScheduledUpdate {
    id: NodeId,
    composer: WeakNode,
    priority: usize,
}

/// Pending-update set plus the ordered batch accumulated since the last flush.
///
/// Owned by whoever drives the loop; never shared across threads directly.
#[derive(Debug, Default)]
pub(crate) struct UpdateScheduler {
    pending: HashSet<NodeId>,
    batch: Vec<ScheduledUpdate>,
}

impl UpdateScheduler {
    /// Schedule the composer enclosing `node` for re-render.
    ///
    /// Returns `true` when a new entry was added, `false` when the node is
    /// unmounted, has no enclosing composer, or that composer is already
    /// pending.
    pub(crate) fn schedule(&mut self, node: &NodeRef) -> bool {
        if !node.mounted() {
            return false;
        }

        let mut composer: Option<NodeRef> = None;
        let mut depth = 0;

        for current in ancestors(node.clone()) {
            if composer.is_some() {
                depth += 1;
                continue;
            }
            if current.as_composer().is_some() {
                if self.pending.contains(&current.id()) {
                    trace!(composer = %current.id(), "update already pending");
                    return false;
                }
                composer = Some(current);
            }
        }

        let Some(composer) = composer else {
            return false;
        };

        let id = composer.id();
        self.pending.insert(id);
        self.batch.push(ScheduledUpdate {
            id,
            composer: Arc::downgrade(&composer),
            priority: depth + 1,
        });
        true
    }

    /// Re-render every pending composer, root-closest first.
    ///
    /// Returns how many composers were re-rendered. A re-render error aborts
    /// the pass and leaves the batch in place so the caller can report it.
    pub(crate) fn flush(&mut self) -> Result<usize, TreeError> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.batch.sort_by_key(|update| update.priority);

        let mut rendered = 0;
        for update in &self.batch {
            let Some(node) = upgrade_mounted(&update.composer) else {
                self.pending.remove(&update.id);
                continue;
            };
            if !self.pending.contains(&update.id) {
                continue;
            }

            if let Some(composer) = node.as_composer() {
                composer.update_root()?;
                rendered += 1;
            }
            self.pending.remove(&update.id);
        }

        self.batch.clear();
        Ok(rendered)
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self, id: NodeId) -> bool {
        self.pending.contains(&id)
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn batch_len(&self) -> usize {
        self.batch.len()
    }
}
