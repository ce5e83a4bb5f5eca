//! Batched completion handles for fan-out work.
//!
//! A [`Completion`] is created with a fixed capacity; each [`add`] reserves
//! one write-once result slot, and [`wait`] blocks until every reserved slot
//! has been fulfilled. The same handle can be recycled for a new batch, but
//! only by an explicit [`reset`] — reuse without resetting is a contract
//! violation, and `add` past capacity is a hard error.
//!
//! [`add`]: Completion::add
//! [`wait`]: Completion::wait
//! [`reset`]: Completion::reset

use frameserve_core::{FrameServeError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

struct State<T> {
    results: Vec<Option<T>>,
    reserved: usize,
    done: usize,
    /// Bumped by reset() so slots from a previous batch cannot write into
    /// the new one.
    generation: u64,
}

struct Shared<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    cv: Condvar,
}

/// Completion handle batching up to `capacity` pending results.
pub struct Completion<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Completion<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// A reserved, write-once result slot. If the slot is dropped unfulfilled
/// (for example the producing job panicked), it still counts as done so
/// `wait` can return; `get` then yields `None` for that index.
pub struct CompletionSlot<T> {
    shared: Arc<Shared<T>>,
    index: usize,
    generation: u64,
    armed: bool,
}

impl<T: Send + 'static> Completion<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity,
                state: Mutex::new(State {
                    results: (0..capacity).map(|_| None).collect(),
                    reserved: 0,
                    done: 0,
                    generation: 0,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    /// Reserve the next result slot. Fails once all `capacity` slots of the
    /// current batch are reserved.
    pub fn add(&self) -> Result<CompletionSlot<T>> {
        let mut state = self.shared.state.lock();
        if state.reserved == self.shared.capacity {
            return Err(FrameServeError::CompletionFull);
        }
        let index = state.reserved;
        state.reserved += 1;
        Ok(CompletionSlot {
            shared: self.shared.clone(),
            index,
            generation: state.generation,
            armed: true,
        })
    }

    /// Block until every reserved slot of the current batch is done.
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while state.done < state.reserved {
            self.shared.cv.wait(&mut state);
        }
    }

    /// Whether every reserved slot is done, without blocking.
    pub fn finished(&self) -> bool {
        let state = self.shared.state.lock();
        state.done >= state.reserved
    }

    /// Reserved slots in the current batch.
    pub fn size(&self) -> usize {
        self.shared.state.lock().reserved
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Result of slot `i`, or `None` if out of range, unfulfilled, or
    /// abandoned. Call after [`Completion::wait`].
    pub fn get(&self, i: usize) -> Option<T>
    where
        T: Clone,
    {
        let state = self.shared.state.lock();
        if i >= state.reserved {
            return None;
        }
        state.results[i].clone()
    }

    /// Move slot `i`'s result out of the handle. Call after
    /// [`Completion::wait`]; subsequent reads of the slot yield `None`.
    pub fn take(&self, i: usize) -> Option<T> {
        let mut state = self.shared.state.lock();
        if i >= state.reserved {
            return None;
        }
        state.results[i].take()
    }

    /// Recycle the handle for a new batch. Precondition: the previous batch
    /// has been waited on and no slots from it are still live.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        for slot in &mut state.results {
            *slot = None;
        }
        state.reserved = 0;
        state.done = 0;
    }
}

impl<T> CompletionSlot<T> {
    /// Fulfill the slot with `value`. Writes from a batch that has since
    /// been reset are discarded.
    pub fn fulfill(mut self, value: T) {
        self.armed = false;
        let mut state = self.shared.state.lock();
        if state.generation != self.generation {
            return;
        }
        if state.results[self.index].is_none() {
            state.results[self.index] = Some(value);
            state.done += 1;
            if state.done >= state.reserved {
                self.shared.cv.notify_all();
            }
        }
    }
}

impl<T> Drop for CompletionSlot<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.state.lock();
        if state.generation == self.generation && state.results[self.index].is_none() {
            state.done += 1;
            if state.done >= state.reserved {
                self.shared.cv.notify_all();
            }
        }
    }
}
