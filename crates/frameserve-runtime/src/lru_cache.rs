//! Generic bounded LRU cache with in-flight entries.
//!
//! The cache maps an integer-like key to a value slot that is either ready
//! or still being produced. A miss with `create_if_missing` atomically
//! reserves the key, so concurrent requesters for the same key serialize
//! into a single producer; everyone else blocks until the producer commits
//! or rolls back. Ready entries live on an index-linked recency list and are
//! evicted least-recently-used first; reservations are never evicted.
//!
//! A short ghost list of recently missed keys drives `requested_capacity`:
//! a repeat miss means caching one more entry would have produced a hit, so
//! the cache asks to grow. The runtime decides whether to grant it.

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

const NIL: usize = usize::MAX;

/// Keys remembered for requested-capacity growth detection.
const GHOST_WINDOW: usize = 16;

/// Outcome of a cache lookup.
pub enum Lookup<K: Copy + Eq + Hash, V: Clone> {
    /// Caching is disabled (capacity 0); produce without storing.
    NoCache,
    /// Ready value, promoted to most-recently-used.
    Hit(V),
    /// The key is now reserved for this caller: produce, then commit or
    /// roll back.
    Miss(Reservation<K, V>),
    /// Absent and not reserved (`create_if_missing` was false).
    Absent,
}

struct Slot<K, V> {
    key: K,
    /// `None` while the entry is being produced.
    value: Option<V>,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    map: HashMap<K, usize>,
    slots: Vec<Slot<K, V>>,
    free: Vec<usize>,
    /// Most-recently-used end of the recency list. Only ready entries are
    /// linked.
    head: usize,
    tail: usize,
    ready_len: usize,
    min: usize,
    max: usize,
    requested: usize,
    ghosts: VecDeque<K>,
}

pub struct LruCache<K: Copy + Eq + Hash, V: Clone> {
    shared: Arc<Shared<K, V>>,
}

impl<K: Copy + Eq + Hash, V: Clone> Clone for LruCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<K, V> {
    inner: Mutex<Inner<K, V>>,
    ready_cv: Condvar,
}

/// A reserved cache entry. Dropping a reservation without committing rolls
/// it back, so a panicking producer cannot wedge the key.
pub struct Reservation<K: Copy + Eq + Hash, V: Clone> {
    shared: Arc<Shared<K, V>>,
    key: K,
    armed: bool,
}

impl<K: Copy + Eq + Hash, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    map: HashMap::new(),
                    slots: Vec::new(),
                    free: Vec::new(),
                    head: NIL,
                    tail: NIL,
                    ready_len: 0,
                    min: 0,
                    max: capacity,
                    requested: capacity,
                    ghosts: VecDeque::new(),
                }),
                ready_cv: Condvar::new(),
            }),
        }
    }

    /// Look up `key`. See [`Lookup`] for the possible outcomes. A lookup
    /// that finds the key in production blocks until the producer resolves
    /// it.
    pub fn lookup(&self, key: K, create_if_missing: bool) -> Lookup<K, V> {
        let mut inner = self.shared.inner.lock();
        if inner.enforced_capacity() == 0 {
            inner.note_miss(key);
            return Lookup::NoCache;
        }
        loop {
            if let Some(idx) = inner.map.get(&key).copied() {
                if let Some(value) = inner.slots[idx].value.clone() {
                    inner.detach(idx);
                    inner.push_front(idx);
                    return Lookup::Hit(value);
                }
                // Another caller is producing this key.
                self.shared.ready_cv.wait(&mut inner);
                continue;
            }
            inner.note_miss(key);
            if !create_if_missing {
                return Lookup::Absent;
            }
            let idx = inner.alloc_slot(key);
            inner.map.insert(key, idx);
            return Lookup::Miss(Reservation {
                shared: self.shared.clone(),
                key,
                armed: true,
            });
        }
    }

    /// Bound the cache to hold at least `min` and at most `max` ready
    /// entries, evicting immediately if the new bound is exceeded.
    pub fn set_limits(&self, min: usize, max: usize) {
        let mut evicted: SmallVec<[V; 4]> = SmallVec::new();
        let mut inner = self.shared.inner.lock();
        inner.min = min;
        inner.max = max;
        inner.requested = inner.requested.max(max);
        inner.evict_over_capacity(&mut evicted);
        drop(inner);
        drop(evicted);
    }

    pub fn limits(&self) -> (usize, usize) {
        let inner = self.shared.inner.lock();
        (inner.min, inner.max)
    }

    /// Ready entries currently held.
    pub fn len(&self) -> usize {
        self.shared.inner.lock().ready_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enforced capacity (the `max` limit).
    pub fn capacity(&self) -> usize {
        self.shared.inner.lock().max
    }

    /// Capacity the cache would like to grow to, always >= `capacity()`.
    pub fn requested_capacity(&self) -> usize {
        self.shared.inner.lock().requested
    }
}

impl<K: Copy + Eq + Hash, V: Clone> Reservation<K, V> {
    pub fn key(&self) -> K {
        self.key
    }

    /// Publish `value` for the reserved key and promote it to
    /// most-recently-used. Waiting same-key lookups observe the value.
    pub fn commit(mut self, value: V) {
        self.armed = false;
        let mut evicted: SmallVec<[V; 4]> = SmallVec::new();
        let shared = self.shared.clone();
        let mut inner = shared.inner.lock();
        if let Some(idx) = inner.map.get(&self.key).copied() {
            if inner.slots[idx].value.is_none() {
                inner.slots[idx].value = Some(value);
                inner.push_front(idx);
                inner.ready_len += 1;
                inner.evict_over_capacity(&mut evicted);
            }
        }
        shared.ready_cv.notify_all();
        drop(inner);
        drop(evicted);
    }

    /// Remove the reservation so a later lookup can retry production.
    pub fn rollback(mut self) {
        self.armed = false;
        rollback_key(&self.shared, self.key);
    }
}

impl<K: Copy + Eq + Hash, V: Clone> Drop for Reservation<K, V> {
    fn drop(&mut self) {
        if self.armed {
            rollback_key(&self.shared, self.key);
        }
    }
}

fn rollback_key<K: Copy + Eq + Hash, V: Clone>(shared: &Shared<K, V>, key: K) {
    let mut inner = shared.inner.lock();
    if let Some(idx) = inner.map.get(&key).copied() {
        if inner.slots[idx].value.is_none() {
            inner.map.remove(&key);
            inner.free.push(idx);
        }
    }
    shared.ready_cv.notify_all();
}

impl<K: Copy + Eq + Hash, V: Clone> Inner<K, V> {
    fn enforced_capacity(&self) -> usize {
        self.max.max(self.min)
    }

    fn alloc_slot(&mut self, key: K) -> usize {
        let slot = Slot {
            key,
            value: None,
            prev: NIL,
            next: NIL,
        };
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = slot;
            idx
        } else {
            self.slots.push(slot);
            self.slots.len() - 1
        }
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev != NIL {
            self.slots[prev].next = next;
        } else if self.head == idx {
            self.head = next;
        }
        if next != NIL {
            self.slots[next].prev = prev;
        } else if self.tail == idx {
            self.tail = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    /// Evict least-recently-used ready entries beyond capacity, pushing the
    /// values into `out` so the caller can drop them outside the lock.
    fn evict_over_capacity(&mut self, out: &mut SmallVec<[V; 4]>) {
        while self.ready_len > self.enforced_capacity() {
            let idx = self.tail;
            if idx == NIL {
                break;
            }
            self.detach(idx);
            let key = self.slots[idx].key;
            if let Some(value) = self.slots[idx].value.take() {
                out.push(value);
            }
            self.map.remove(&key);
            self.free.push(idx);
            self.ready_len -= 1;
            self.remember_ghost(key);
        }
    }

    /// Record a miss; a repeat miss within the ghost window means one more
    /// slot would have produced a hit, so the cache requests growth.
    fn note_miss(&mut self, key: K) {
        if let Some(pos) = self.ghosts.iter().position(|k| *k == key) {
            self.ghosts.remove(pos);
            self.requested += 1;
        } else {
            self.remember_ghost(key);
        }
    }

    fn remember_ghost(&mut self, key: K) {
        if self.ghosts.len() == GHOST_WINDOW {
            self.ghosts.pop_front();
        }
        self.ghosts.push_back(key);
    }
}
