//! Ranked registry of live cache nodes.
//!
//! The runtime keeps every cache node ordered by recency of access: the
//! back of the list is the most recently touched. Memory pressure walks the
//! list front-to-back (least recent first) when deciding which cache to
//! shrink; grow-on-slack promotes the requester to the back first.

use crate::cache::CacheFilter;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

pub(crate) type CacheId = u64;

pub(crate) struct CacheRegistry {
    /// Front = least recently touched, back = most recently touched.
    order: VecDeque<(CacheId, Weak<CacheFilter>)>,
}

impl CacheRegistry {
    pub(crate) fn new() -> Self {
        Self {
            order: VecDeque::new(),
        }
    }

    /// New registrants start as most recently touched.
    pub(crate) fn register(&mut self, id: CacheId, cache: Weak<CacheFilter>) {
        self.order.push_back((id, cache));
    }

    pub(crate) fn unregister(&mut self, id: CacheId) {
        self.order.retain(|(cid, _)| *cid != id);
    }

    /// Promote `id` to most recently touched.
    pub(crate) fn touch(&mut self, id: CacheId) {
        if let Some(pos) = self.order.iter().position(|(cid, _)| *cid == id) {
            if pos != self.order.len() - 1 {
                if let Some(entry) = self.order.remove(pos) {
                    self.order.push_back(entry);
                }
            }
        }
    }

    pub(crate) fn is_most_recent(&self, id: CacheId) -> bool {
        self.order.back().map(|(cid, _)| *cid == id).unwrap_or(false)
    }

    pub(crate) fn get(&self, id: CacheId) -> Option<Arc<CacheFilter>> {
        self.order
            .iter()
            .find(|(cid, _)| *cid == id)
            .and_then(|(_, weak)| weak.upgrade())
    }

    /// Snapshot in least-recent-first order, for pressure walks that call
    /// back into the nodes.
    pub(crate) fn snapshot_lru(&self) -> Vec<(CacheId, Weak<CacheFilter>)> {
        self.order.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Drop entries whose cache node has been destroyed.
    pub(crate) fn prune_dead(&mut self) {
        self.order.retain(|(_, weak)| weak.strong_count() > 0);
    }
}
