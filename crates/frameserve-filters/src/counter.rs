//! A source that stamps each frame with its own number.
//!
//! The frame number is written little-endian into the first bytes of the
//! primary plane, and every production is counted, which makes this the
//! workhorse for cache behavior tests. Production can be made to fail for
//! selected frames.

use frameserve_core::{frame, FrameHandle, FrameServeError, Plane, Result, VideoInfo};
use frameserve_runtime::{Runtime, VideoFilter};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct FrameCounterSource {
    info: VideoInfo,
    productions: AtomicUsize,
    fail_on: HashSet<usize>,
}

impl FrameCounterSource {
    pub fn new(info: VideoInfo) -> Self {
        Self {
            info,
            productions: AtomicUsize::new(0),
            fail_on: HashSet::new(),
        }
    }

    /// Make production of frame `n` fail.
    pub fn fail_on(mut self, n: usize) -> Self {
        self.fail_on.insert(n);
        self
    }

    /// Total successful and failed production attempts.
    pub fn productions(&self) -> usize {
        self.productions.load(Ordering::SeqCst)
    }

    /// Read the stamp back out of a produced frame, or 0 if the primary
    /// plane is missing or too small to carry one.
    pub fn stamp_of(frame: &FrameHandle) -> u64 {
        let Some(bytes) = frame.plane(Plane::Primary) else {
            return 0;
        };
        if bytes.len() < 8 {
            return 0;
        }
        let mut stamp = [0u8; 8];
        stamp.copy_from_slice(&bytes[..8]);
        u64::from_le_bytes(stamp)
    }
}

impl VideoFilter for FrameCounterSource {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, n: usize, env: &Runtime) -> Result<FrameHandle> {
        self.productions.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.contains(&n) {
            return Err(FrameServeError::Filter(format!(
                "injected failure producing frame {n}"
            )));
        }
        let mut handle = env.new_video_frame(&self.info, 0)?;
        let out = frame::writable(&mut handle)?;
        let bytes = out.plane_mut(Plane::Primary)?;
        bytes[..8].copy_from_slice(&(n as u64).to_le_bytes());
        Ok(handle)
    }
}
