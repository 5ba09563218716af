//! Live streams of one connection.
//!
//! Streams live in a slab; an id index maps wire ids to slots. Closed
//! streams are not removed immediately: their ids go on an expiry queue and
//! are dropped once the grace period has passed, so late frames for them
//! still find an entry. An id is queued at most once, with the deadline of
//! its first scheduling. The queue is drained by [`StreamStore::prune`],
//! which the inbound loop calls before every frame.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::{FnvHashMap, FnvHashSet};
use slab::Slab;
use tracing::trace;

use crate::stream::Stream;

#[derive(Debug)]
pub(crate) struct StreamStore {
    slots: Slab<Arc<Stream>>,
    index: FnvHashMap<u32, usize>,
    /// (deadline, stream id), deadlines non-decreasing.
    expiry: VecDeque<(Instant, u32)>,
    /// Ids currently on `expiry`.
    scheduled: FnvHashSet<u32>,
    grace: Duration,
}

impl StreamStore {
    pub(crate) fn new(grace: Duration) -> Self {
        Self {
            slots: Slab::new(),
            index: FnvHashMap::default(),
            expiry: VecDeque::new(),
            scheduled: FnvHashSet::default(),
            grace,
        }
    }

    pub(crate) fn get(&self, id: u32) -> Option<Arc<Stream>> {
        self.index.get(&id).map(|key| self.slots[*key].clone())
    }

    pub(crate) fn contains(&self, id: u32) -> bool {
        self.index.contains_key(&id)
    }

    /// Insert a new stream. An id already present keeps its entry and the
    /// existing stream is returned.
    pub(crate) fn insert(&mut self, stream: Arc<Stream>) -> Arc<Stream> {
        if let Some(existing) = self.get(stream.id()) {
            return existing;
        }
        let id = stream.id();
        let key = self.slots.insert(stream.clone());
        self.index.insert(id, key);
        trace!(stream_id = id, live = self.slots.len(), "stream inserted");
        stream
    }

    /// Queue `id` for removal once the grace period has passed. An id that
    /// is already queued keeps its original deadline.
    pub(crate) fn schedule_removal(&mut self, id: u32, now: Instant) {
        if !self.contains(id) || !self.scheduled.insert(id) {
            return;
        }
        let deadline = now + self.grace;
        // Keep deadlines ordered even if callers pass a stale `now`.
        let deadline = match self.expiry.back() {
            Some((last, _)) if *last > deadline => *last,
            _ => deadline,
        };
        self.expiry.push_back((deadline, id));
    }

    /// Drop every stream whose deadline is at or before `now`. Returns how
    /// many were removed.
    pub(crate) fn prune(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some((deadline, id)) = self.expiry.front().copied() {
            if deadline > now {
                break;
            }
            self.expiry.pop_front();
            self.scheduled.remove(&id);
            if let Some(key) = self.index.remove(&id) {
                self.slots.remove(key);
                removed += 1;
                trace!(stream_id = id, "stream removed");
            }
        }
        removed
    }

    /// Snapshot of every stream still in the store.
    pub(crate) fn streams(&self) -> Vec<Arc<Stream>> {
        self.slots.iter().map(|(_, s)| s.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.expiry.len()
    }

    /// Empty the store, returning what it held.
    pub(crate) fn drain(&mut self) -> Vec<Arc<Stream>> {
        self.index.clear();
        self.expiry.clear();
        self.scheduled.clear();
        self.slots.drain().collect()
    }
}
