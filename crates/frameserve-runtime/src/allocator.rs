//! Frame buffer reuse pool.
//!
//! Retired buffers come back through a channel (the drop path of the last
//! frame handle must never take the runtime's coordination lock) and are
//! drained into a size-ordered pool under that lock. Acquisition is best-fit:
//! the smallest pooled buffer whose capacity covers the request wins.

use crossbeam_channel::Sender;
use frameserve_core::{align_up, BufferRecycler, FrameBuffer};
use std::collections::BTreeMap;

/// Size-ordered pool of unused buffers. Keyed by (size, insertion counter)
/// so equal-sized buffers stay distinct.
pub(crate) struct BufferPool {
    by_size: BTreeMap<(usize, u64), FrameBuffer>,
    counter: u64,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self {
            by_size: BTreeMap::new(),
            counter: 0,
        }
    }

    /// Retire a buffer into the pool, advancing its change sequence.
    pub(crate) fn insert(&mut self, mut buffer: FrameBuffer) {
        buffer.bump_sequence();
        self.counter += 1;
        self.by_size.insert((buffer.size(), self.counter), buffer);
    }

    /// Take the smallest pooled buffer with capacity >= `size`, advancing
    /// its change sequence for the new allocation.
    pub(crate) fn take_best_fit(&mut self, size: usize) -> Option<FrameBuffer> {
        let key = *self.by_size.range((size, 0u64)..).next()?.0;
        let mut buffer = self.by_size.remove(&key)?;
        buffer.bump_sequence();
        Some(buffer)
    }

    /// Drop pooled buffers smaller than `size`; returns bytes freed.
    pub(crate) fn purge_smaller_than(&mut self, size: usize) -> u64 {
        let keys: Vec<(usize, u64)> = self
            .by_size
            .range(..(size, 0u64))
            .map(|(k, _)| *k)
            .collect();
        let mut freed = 0u64;
        for key in keys {
            if let Some(buffer) = self.by_size.remove(&key) {
                freed += buffer.size() as u64;
            }
        }
        freed
    }

    /// Drop every pooled buffer; returns bytes freed.
    pub(crate) fn clear(&mut self) -> u64 {
        let freed = self.by_size.values().map(|b| b.size() as u64).sum();
        self.by_size.clear();
        freed
    }

    pub(crate) fn len(&self) -> usize {
        self.by_size.len()
    }
}

/// Routes retired buffers back to the pool. Frames hold a `Weak` to this, so
/// buffers dropped after runtime teardown are simply freed.
pub(crate) struct PoolRecycler {
    tx: Sender<FrameBuffer>,
}

impl PoolRecycler {
    pub(crate) fn new(tx: Sender<FrameBuffer>) -> Self {
        Self { tx }
    }
}

impl BufferRecycler for PoolRecycler {
    fn recycle(&self, buffer: FrameBuffer) {
        let _ = self.tx.send(buffer);
    }
}

/// Planned geometry for a planar allocation.
pub(crate) struct PlanarPlan {
    pub pitch_y: usize,
    pub pitch_uv: usize,
    pub alloc_size: usize,
}

/// Pitch and allocation size for a packed frame. The allocation is padded by
/// `align - 1` bytes so the data pointer can be aligned after the fact.
pub(crate) fn plan_packed(row_size: usize, height: usize, align: usize) -> (usize, usize) {
    let pitch = align_up(row_size, align);
    (pitch, pitch * height + align - 1)
}

/// Pitches and allocation size for a planar frame. In legacy packed-chroma
/// mode, YV12-shaped requests derive the chroma pitch as half the luma pitch
/// instead of aligning the chroma rows independently.
pub(crate) fn plan_planar(
    row_size: usize,
    height: usize,
    row_size_uv: usize,
    height_uv: usize,
    align: usize,
    legacy_packed_chroma: bool,
) -> PlanarPlan {
    let pitch_y = align_up(row_size, align);
    let pitch_uv = if legacy_packed_chroma && row_size == row_size_uv * 2 && height == height_uv * 2
    {
        (pitch_y + 1) >> 1
    } else {
        align_up(row_size_uv, align)
    };
    PlanarPlan {
        pitch_y,
        pitch_uv,
        alloc_size: pitch_y * height + 2 * pitch_uv * height_uv + align - 1,
    }
}
