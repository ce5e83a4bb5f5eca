//! Per-filter concurrency guards.
//!
//! Filters declare how they tolerate concurrent `get_frame` invocation. A
//! guard stays dormant (no locking) until a parallel-prefetch scheduler is
//! installed on the runtime; at that point every registered guard is
//! upgraded and serialized filters take a per-node lock around production.

use crate::filter::{CacheHint, HintReply, VideoFilter};
use crate::runtime::Runtime;
use frameserve_core::{FrameHandle, Result, VideoInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a filter tolerates concurrent frame production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtMode {
    /// Safe under free concurrent invocation.
    NiceFilter,
    /// Safe if each thread uses its own instance.
    MultiInstance,
    /// Calls must be serialized.
    Serialized,
}

/// Wraps a filter whose MT mode requires coordination.
pub struct MtGuard {
    child: Arc<dyn VideoFilter>,
    mode: MtMode,
    env: Runtime,
    id: u64,
    serialize: Mutex<()>,
    mt_enabled: AtomicBool,
}

impl MtGuard {
    /// Wrap `child` according to `mode`. Modes that need no runtime
    /// coordination return the child unwrapped.
    pub fn wrap(child: Arc<dyn VideoFilter>, mode: MtMode, env: &Runtime) -> Arc<dyn VideoFilter> {
        if mode != MtMode::Serialized {
            return child;
        }
        let id = env.allocate_guard_id();
        let guard = Arc::new(MtGuard {
            child,
            mode,
            env: env.clone(),
            id,
            serialize: Mutex::new(()),
            mt_enabled: AtomicBool::new(env.prefetch_threads().is_some()),
        });
        env.register_mt_guard(id, Arc::downgrade(&guard));
        guard
    }

    pub fn mode(&self) -> MtMode {
        self.mode
    }

    /// Switch the guard into MT operation. Called by the runtime when a
    /// prefetcher is installed.
    pub fn enable_mt(&self) {
        self.mt_enabled.store(true, Ordering::Release);
    }
}

impl VideoFilter for MtGuard {
    fn video_info(&self) -> &VideoInfo {
        self.child.video_info()
    }

    fn get_frame(&self, n: usize, env: &Runtime) -> Result<FrameHandle> {
        if self.mode == MtMode::Serialized && self.mt_enabled.load(Ordering::Acquire) {
            let _serialized = self.serialize.lock();
            self.child.get_frame(n, env)
        } else {
            self.child.get_frame(n, env)
        }
    }

    fn get_audio(&self, buf: &mut [u8], start: i64, count: i64, env: &Runtime) -> Result<()> {
        self.child.get_audio(buf, start, count, env)
    }

    fn get_parity(&self, n: usize) -> bool {
        self.child.get_parity(n)
    }

    fn set_cache_hints(&self, hint: CacheHint) -> HintReply {
        self.child.set_cache_hints(hint)
    }
}

impl Drop for MtGuard {
    fn drop(&mut self) {
        self.env.unregister_mt_guard(self.id);
    }
}
