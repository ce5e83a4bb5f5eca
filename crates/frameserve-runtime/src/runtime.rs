//! The top-level runtime environment.
//!
//! One `Runtime` owns the frame allocator and reuse pool, the cache
//! registry, the MT-guard registry, the worker thread pool, and the global
//! memory accounting. Handles are cheap clones; every filter receives one
//! in `get_frame`.
//!
//! Memory model: `memory_used` tracks the byte total of live and pooled
//! frame buffers against the soft ceiling `memory_max`. Before a fresh
//! allocation would push usage past 85% of the ceiling, caches are shrunk
//! least-recently-touched first and the freed buffers dropped. The ceiling
//! is soft: a request that exceeds it after all reclamation still proceeds,
//! and only an actual allocation failure is an error.

use crate::allocator::{plan_packed, plan_planar, BufferPool, PoolRecycler};
use crate::cache::CacheFilter;
use crate::completion::{Completion, CompletionSlot};
use crate::filter::{CacheHint, HintReply, VideoFilter};
use crate::mt_guard::MtGuard;
use crate::registry::{CacheId, CacheRegistry};
use crate::thread_pool::ThreadPool;
use frameserve_core::tuning::{
    FRAME_ALIGN, MEMORY_MAX_FLOOR, MEMORY_MAX_STARTUP_CAP, MEMORY_RESERVE_LARGE,
    MEMORY_RESERVE_SMALL,
};
use frameserve_core::{
    copy_plane, frame, BufferRecycler, Frame, FrameBuffer, FrameHandle, FrameServeError,
    PixelLayout, Plane, PlaneDesc, PlaneLayout, Result, VideoInfo,
};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use sysinfo::{System, SystemExt};
use tracing::{debug, info};

const MIB: u64 = 1024 * 1024;

/// Runtime construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Worker threads; defaults to hardware concurrency.
    pub threads: Option<usize>,
    /// Global memory ceiling in MiB; defaults to a quarter of physical RAM.
    pub memory_max_mib: Option<u64>,
    /// Default row alignment for frame pitches.
    pub frame_align: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: None,
            memory_max_mib: None,
            frame_align: FRAME_ALIGN,
        }
    }
}

/// State behind the single coarse coordination lock: the buffer pool, the
/// ranked cache registry, and the MT-guard registry. Operations under it are
/// short relative to pixel processing.
struct Coordinator {
    pool: BufferPool,
    caches: CacheRegistry,
    mt_guards: Vec<(u64, Weak<MtGuard>)>,
    planar_chroma_alignment: bool,
    prefetch_threads: Option<usize>,
}

struct RuntimeInner {
    state: Mutex<Coordinator>,
    memory_used: AtomicU64,
    memory_max: AtomicU64,
    retired_rx: Receiver<FrameBuffer>,
    recycler: Arc<PoolRecycler>,
    thread_pool: ThreadPool,
    next_cache_id: AtomicU64,
    next_guard_id: AtomicU64,
    frame_align: usize,
}

/// Shared handle to the runtime environment.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Result<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Result<Self> {
        let threads = config.threads.unwrap_or_else(num_cpus::get);
        let memory_max = match config.memory_max_mib {
            Some(mib) => constrain_memory_request(mib * MIB),
            None => default_memory_max(),
        };
        let (retired_tx, retired_rx) = crossbeam_channel::unbounded();
        let runtime = Self {
            inner: Arc::new(RuntimeInner {
                state: Mutex::new(Coordinator {
                    pool: BufferPool::new(),
                    caches: CacheRegistry::new(),
                    mt_guards: Vec::new(),
                    planar_chroma_alignment: true,
                    prefetch_threads: None,
                }),
                memory_used: AtomicU64::new(0),
                memory_max: AtomicU64::new(memory_max),
                retired_rx,
                recycler: Arc::new(PoolRecycler::new(retired_tx)),
                thread_pool: ThreadPool::new(threads)?,
                next_cache_id: AtomicU64::new(1),
                next_guard_id: AtomicU64::new(1),
                frame_align: config.frame_align.max(1),
            }),
        };
        info!(
            threads,
            memory_max_mib = memory_max / MIB,
            "runtime initialized"
        );
        Ok(runtime)
    }

    // ---------------------------------------------------------------
    // Frame allocation
    // ---------------------------------------------------------------

    /// Allocate a frame for `vi`. `align` of 0 uses the default alignment;
    /// a negative value forces that exact alignment.
    pub fn new_video_frame(&self, vi: &VideoInfo, align: i32) -> Result<FrameHandle> {
        vi.validate_dimensions()?;
        let align = self.effective_align(align)?;
        match vi.layout {
            PixelLayout::Packed { .. } => {
                self.new_packed_frame(vi.row_size(), vi.height as usize, align)
            }
            PixelLayout::Planar { v_plane_first, .. } => self.new_planar_frame(
                vi.row_size(),
                vi.height as usize,
                vi.chroma_row_size(),
                vi.chroma_height(),
                align,
                !v_plane_first,
            ),
        }
    }

    fn effective_align(&self, align: i32) -> Result<usize> {
        let align = if align < 0 {
            align.unsigned_abs() as usize
        } else {
            (align as usize).max(self.inner.frame_align)
        };
        if !align.is_power_of_two() {
            return Err(FrameServeError::InvalidParameter(format!(
                "frame alignment {align} is not a power of two"
            )));
        }
        Ok(align)
    }

    fn new_packed_frame(&self, row_size: usize, height: usize, align: usize) -> Result<FrameHandle> {
        let (pitch, alloc_size) = plan_packed(row_size, height, align);
        let buffer = self.acquire(alloc_size)?;
        let offset = buffer.data().as_ptr().align_offset(align);
        let layout = PlaneLayout::packed(PlaneDesc {
            offset,
            pitch,
            row_size,
            height,
        });
        self.wrap_buffer(buffer, layout)
    }

    fn new_planar_frame(
        &self,
        row_size: usize,
        height: usize,
        row_size_uv: usize,
        height_uv: usize,
        align: usize,
        u_first: bool,
    ) -> Result<FrameHandle> {
        let legacy = !self.planar_chroma_alignment_enabled();
        let plan = plan_planar(row_size, height, row_size_uv, height_uv, align, legacy);
        let buffer = self.acquire(plan.alloc_size)?;
        let offset_y = buffer.data().as_ptr().align_offset(align);

        let luma_end = offset_y + plan.pitch_y * height;
        let (offset_u, offset_v) = if u_first {
            (luma_end, luma_end + plan.pitch_uv * height_uv)
        } else {
            (luma_end + plan.pitch_uv * height_uv, luma_end)
        };

        let layout = PlaneLayout::planar(
            PlaneDesc {
                offset: offset_y,
                pitch: plan.pitch_y,
                row_size,
                height,
            },
            PlaneDesc {
                offset: offset_u,
                pitch: plan.pitch_uv,
                row_size: row_size_uv,
                height: height_uv,
            },
            PlaneDesc {
                offset: offset_v,
                pitch: plan.pitch_uv,
                row_size: row_size_uv,
                height: height_uv,
            },
        );
        self.wrap_buffer(buffer, layout)
    }

    fn wrap_buffer(&self, buffer: FrameBuffer, layout: PlaneLayout) -> Result<FrameHandle> {
        let recycler: Arc<dyn BufferRecycler> = self.inner.recycler.clone();
        let frame = Frame::new(Arc::new(buffer), layout, Arc::downgrade(&recycler))?;
        Ok(Arc::new(frame))
    }

    /// Acquire a buffer of at least `size` bytes: reuse the best-fitting
    /// pooled buffer, else allocate fresh, else purge undersized pool
    /// entries and retry once. Failure after that is a hard error.
    fn acquire(&self, size: usize) -> Result<FrameBuffer> {
        if size > i32::MAX as usize {
            return Err(FrameServeError::BufferTooLarge { requested: size });
        }
        // Declared before the lock guard: cache nodes touched under the lock
        // must not see their final reference drop while the lock is held
        // (their teardown re-enters the registry).
        let mut held: Vec<Arc<CacheFilter>> = Vec::new();
        let mut state = self.inner.state.lock();
        self.drain_retired(&mut state);

        if let Some(buffer) = state.pool.take_best_fit(size) {
            return Ok(buffer);
        }
        if let Some(buffer) = self.try_allocate(&mut state, size, &mut held) {
            return Ok(buffer);
        }

        let freed = state.pool.purge_smaller_than(size);
        if freed > 0 {
            self.inner.memory_used.fetch_sub(freed, Ordering::SeqCst);
            debug!(freed, "purged undersized pooled buffers");
        }
        if let Some(buffer) = self.try_allocate(&mut state, size, &mut held) {
            return Ok(buffer);
        }

        Err(FrameServeError::OutOfMemory(format!(
            "could not allocate a {size} byte frame buffer"
        )))
    }

    fn try_allocate(
        &self,
        state: &mut Coordinator,
        size: usize,
        held: &mut Vec<Arc<CacheFilter>>,
    ) -> Option<FrameBuffer> {
        self.ensure_memory_limit(state, size as u64, held);
        let mut buffer = FrameBuffer::try_allocate(size)?;
        buffer.bump_sequence();
        self.inner
            .memory_used
            .fetch_add(size as u64, Ordering::SeqCst);
        Some(buffer)
    }

    /// Shrink-on-pressure: while the request would push usage past 85% of
    /// the ceiling, walk caches least-recently-touched first, take one slot
    /// from each non-empty cache, and drop the buffers that frees. Degrades
    /// silently when the registry is exhausted.
    fn ensure_memory_limit(
        &self,
        state: &mut Coordinator,
        request: u64,
        held: &mut Vec<Arc<CacheFilter>>,
    ) {
        let memory_max = self.inner.memory_max.load(Ordering::SeqCst);
        let need = |used: u64| ((used + request) as f64 / 0.85) as u64;

        for (id, weak) in state.caches.snapshot_lru() {
            if need(self.inner.memory_used.load(Ordering::SeqCst)) <= memory_max {
                return;
            }
            let Some(cache) = weak.upgrade() else {
                continue;
            };
            let size = match cache.set_cache_hints(CacheHint::GetSize) {
                HintReply::Value(n) => n,
                _ => {
                    held.push(cache);
                    continue;
                }
            };
            if size == 0 {
                held.push(cache);
                continue;
            }
            cache.set_cache_hints(CacheHint::SetMaxCapacity(size - 1));
            debug!(cache = id, new_max = size - 1, "shrank cache under memory pressure");
            held.push(cache);

            // Frames released by the shrink arrive on the retire channel;
            // fold them in and drop everything unused.
            self.drain_retired(state);
            let freed = state.pool.clear();
            if freed > 0 {
                self.inner.memory_used.fetch_sub(freed, Ordering::SeqCst);
            }
        }
    }

    fn drain_retired(&self, state: &mut Coordinator) {
        while let Ok(buffer) = self.inner.retired_rx.try_recv() {
            state.pool.insert(buffer);
        }
    }

    // ---------------------------------------------------------------
    // Frame derivation
    // ---------------------------------------------------------------

    /// Single-plane view into `src` with adjusted geometry.
    pub fn subframe(
        &self,
        src: &FrameHandle,
        rel_offset: isize,
        new_pitch: usize,
        new_row_size: usize,
        new_height: usize,
    ) -> Result<FrameHandle> {
        frame::subframe(src, rel_offset, new_pitch, new_row_size, new_height)
    }

    /// Planar view into `src` with adjusted geometry for all three planes.
    #[allow(clippy::too_many_arguments)]
    pub fn subframe_planar(
        &self,
        src: &FrameHandle,
        rel_offset: isize,
        new_pitch: usize,
        new_row_size: usize,
        new_height: usize,
        rel_offset_u: isize,
        rel_offset_v: isize,
        new_pitch_uv: usize,
        new_row_size_uv: usize,
        new_height_uv: usize,
    ) -> Result<FrameHandle> {
        frame::subframe_planar(
            src,
            rel_offset,
            new_pitch,
            new_row_size,
            new_height,
            rel_offset_u,
            rel_offset_v,
            new_pitch_uv,
            new_row_size_uv,
            new_height_uv,
        )
    }

    /// Replace a shared frame with a freshly allocated private copy.
    /// Returns false if the frame was already writable.
    pub fn make_writable(&self, handle: &mut FrameHandle) -> Result<bool> {
        if frame::is_writable(handle) {
            return Ok(false);
        }
        let src = handle.clone();
        let mut dst = self.new_frame_like(&src)?;
        {
            let dst_frame = frame::writable(&mut dst)?;
            for plane in [Plane::Primary, Plane::U, Plane::V] {
                if let Some(src_bytes) = src.plane(plane) {
                    let src_pitch = src.pitch(plane);
                    let row_size = src.row_size(plane);
                    let height = src.height(plane);
                    let dst_pitch = dst_frame.pitch(plane);
                    let dst_bytes = dst_frame.plane_mut(plane)?;
                    copy_plane(dst_bytes, dst_pitch, src_bytes, src_pitch, row_size, height);
                }
            }
        }
        *handle = dst;
        Ok(true)
    }

    fn new_frame_like(&self, src: &FrameHandle) -> Result<FrameHandle> {
        let align = self.inner.frame_align;
        if src.layout().chroma.is_some() {
            // Internal copies are V-first.
            self.new_planar_frame(
                src.row_size(Plane::Primary),
                src.height(Plane::Primary),
                src.row_size(Plane::U),
                src.height(Plane::U),
                align,
                false,
            )
        } else {
            self.new_packed_frame(src.row_size(Plane::Primary), src.height(Plane::Primary), align)
        }
    }

    /// Toggle legacy packed-chroma alignment; returns the previous state.
    pub fn planar_chroma_alignment(&self, enabled: bool) -> bool {
        let mut state = self.inner.state.lock();
        std::mem::replace(&mut state.planar_chroma_alignment, enabled)
    }

    fn planar_chroma_alignment_enabled(&self) -> bool {
        self.inner.state.lock().planar_chroma_alignment
    }

    // ---------------------------------------------------------------
    // Memory accounting
    // ---------------------------------------------------------------

    /// Set the global memory ceiling in MiB; returns the clamped value.
    pub fn set_memory_max(&self, mib: u64) -> u64 {
        let clamped = constrain_memory_request(mib * MIB);
        self.inner.memory_max.store(clamped, Ordering::SeqCst);
        info!(memory_max_mib = clamped / MIB, "memory ceiling adjusted");
        clamped / MIB
    }

    /// Current ceiling, in bytes.
    pub fn memory_max(&self) -> u64 {
        self.inner.memory_max.load(Ordering::SeqCst)
    }

    /// Bytes of live and pooled frame buffers.
    pub fn memory_used(&self) -> u64 {
        self.inner.memory_used.load(Ordering::SeqCst)
    }

    /// Account for memory held outside the frame allocator.
    pub fn adjust_memory_consumption(&self, amount: u64, minus: bool) {
        if minus {
            self.inner.memory_used.fetch_sub(amount, Ordering::SeqCst);
        } else {
            self.inner.memory_used.fetch_add(amount, Ordering::SeqCst);
        }
    }

    /// Buffers currently waiting in the reuse pool.
    pub fn pooled_buffers(&self) -> usize {
        let mut state = self.inner.state.lock();
        self.drain_retired(&mut state);
        state.pool.len()
    }

    // ---------------------------------------------------------------
    // Cache registry coordination
    // ---------------------------------------------------------------

    pub(crate) fn allocate_cache_id(&self) -> CacheId {
        self.inner.next_cache_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register_cache(&self, id: CacheId, cache: Weak<CacheFilter>) {
        let mut state = self.inner.state.lock();
        state.caches.register(id, cache);
        debug!(cache = id, total = state.caches.len(), "cache registered");
    }

    pub(crate) fn unregister_cache(&self, id: CacheId) {
        let mut state = self.inner.state.lock();
        state.caches.unregister(id);
        state.caches.prune_dead();
    }

    /// Plain touch: promote the cache to most-recently-used.
    pub(crate) fn nod(&self, id: CacheId) {
        let mut state = self.inner.state.lock();
        if !state.caches.is_most_recent(id) {
            state.caches.touch(id);
        }
    }

    /// Grow-on-slack: promote the cache, and if it wants more capacity than
    /// it has, grant one slot — taking one from the least-recently-used
    /// other cache first when free memory is under 10% of the ceiling.
    pub(crate) fn nod_and_expand(&self, id: CacheId) {
        // Held nodes outlive the lock guard; see acquire().
        let mut held: Vec<Arc<CacheFilter>> = Vec::new();
        let mut state = self.inner.state.lock();
        if !state.caches.is_most_recent(id) {
            state.caches.touch(id);
        }
        let Some(cache) = state.caches.get(id) else {
            return;
        };
        held.push(cache.clone());
        let Some(capacity) = cache.set_cache_hints(CacheHint::GetCapacity).value() else {
            return;
        };
        let Some(requested) = cache
            .set_cache_hints(CacheHint::GetRequestedCapacity)
            .value()
        else {
            return;
        };
        if requested <= capacity {
            return;
        }

        let used = self.inner.memory_used.load(Ordering::SeqCst);
        let max = self.inner.memory_max.load(Ordering::SeqCst);
        if used > max || max - used < max / 10 {
            for (victim_id, weak) in state.caches.snapshot_lru() {
                if victim_id == id {
                    continue;
                }
                let Some(victim) = weak.upgrade() else {
                    continue;
                };
                let size = victim.set_cache_hints(CacheHint::GetSize).value();
                let took = match size {
                    Some(size) if size > 0 => {
                        victim.set_cache_hints(CacheHint::SetMaxCapacity(size - 1));
                        debug!(
                            cache = id,
                            victim = victim_id,
                            "took one slot from an idle cache"
                        );
                        true
                    }
                    _ => false,
                };
                held.push(victim);
                if took {
                    break;
                }
            }
        }

        cache.set_cache_hints(CacheHint::SetMaxCapacity(capacity + 1));
        self.drain_retired(&mut state);
    }

    // ---------------------------------------------------------------
    // MT guards & prefetch
    // ---------------------------------------------------------------

    pub(crate) fn allocate_guard_id(&self) -> u64 {
        self.inner.next_guard_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register_mt_guard(&self, id: u64, guard: Weak<MtGuard>) {
        self.inner.state.lock().mt_guards.push((id, guard));
    }

    pub(crate) fn unregister_mt_guard(&self, id: u64) {
        self.inner
            .state
            .lock()
            .mt_guards
            .retain(|(gid, _)| *gid != id);
    }

    /// Install a parallel-prefetch scheduler: upgrades every registered MT
    /// guard into MT operation. Only one prefetcher is allowed.
    pub fn install_prefetcher(&self, threads: usize) -> Result<()> {
        // Held guards outlive the lock guard; see acquire().
        let mut held: Vec<Arc<MtGuard>> = Vec::new();
        let mut state = self.inner.state.lock();
        if state.prefetch_threads.is_some() {
            return Err(FrameServeError::InvalidParameter(
                "only a single prefetcher is allowed per runtime".into(),
            ));
        }
        state.prefetch_threads = Some(threads);
        for (_, weak) in &state.mt_guards {
            if let Some(guard) = weak.upgrade() {
                guard.enable_mt();
                held.push(guard);
            }
        }
        info!(threads, "prefetcher installed; MT guards upgraded");
        Ok(())
    }

    pub fn prefetch_threads(&self) -> Option<usize> {
        self.inner.state.lock().prefetch_threads
    }

    // ---------------------------------------------------------------
    // Parallel work
    // ---------------------------------------------------------------

    /// New completion handle batching up to `capacity` results.
    pub fn new_completion<T: Send + 'static>(&self, capacity: usize) -> Completion<T> {
        Completion::new(capacity)
    }

    /// Run `job` on a worker thread, delivering its result to `slot`.
    pub fn parallel_job<T: Send + 'static>(
        &self,
        slot: CompletionSlot<T>,
        job: impl FnOnce() -> T + Send + 'static,
    ) {
        self.inner.thread_pool.submit(move || slot.fulfill(job()));
    }

    pub fn thread_count(&self) -> usize {
        self.inner.thread_pool.thread_count()
    }
}

fn total_physical_memory() -> u64 {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.total_memory()
}

/// Clamp a requested ceiling into `[64 MiB, usable limit - system reserve]`.
/// On constrained-virtual-address systems the reserve is small; elsewhere a
/// full gibibyte is left for the OS and other processes.
fn constrain_memory_request(requested: u64) -> u64 {
    let total_phys = total_physical_memory();
    let (va_limit, reserve) = if cfg!(target_pointer_width = "32") {
        (u32::MAX as u64, MEMORY_RESERVE_SMALL)
    } else {
        (u64::MAX, MEMORY_RESERVE_LARGE)
    };
    let limit = total_phys.min(va_limit).saturating_sub(reserve);
    requested.clamp(MEMORY_MAX_FLOOR, limit.max(MEMORY_MAX_FLOOR))
}

fn default_memory_max() -> u64 {
    constrain_memory_request(total_physical_memory() / 4).min(MEMORY_MAX_STARTUP_CAP)
}
