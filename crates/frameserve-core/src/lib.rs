//! FrameServe Core - Foundation types for the frame-serving engine
//!
//! This crate provides the fundamental types used throughout FrameServe:
//! - Video stream descriptions (VideoInfo, FrameRate, pixel layouts)
//! - Frame buffers and frame views with per-plane geometry
//! - Pitch-aware plane copies
//! - The shared error type

pub mod blit;
pub mod error;
pub mod frame;
pub mod video_info;

pub use blit::copy_plane;
pub use error::{FrameServeError, Result};
pub use frame::{
    align_up, is_writable, subframe, subframe_planar, writable, BufferRecycler, Frame,
    FrameBuffer, FrameHandle, Plane, PlaneDesc, PlaneLayout,
};
pub use video_info::{AudioInfo, FrameRate, PixelLayout, VideoInfo};

/// Engine-wide tuning constants.
pub mod tuning {
    /// Default row alignment for frame pitches, in bytes.
    pub const FRAME_ALIGN: usize = 32;

    /// Default audio cache buffer size when none is requested.
    pub const AUDIO_CACHE_DEFAULT_BYTES: usize = 256 * 1024;

    /// Smallest permitted global memory ceiling.
    pub const MEMORY_MAX_FLOOR: u64 = 64 * 1024 * 1024;

    /// System reserve subtracted from the memory ceiling on systems whose
    /// virtual address space is not the limiting factor.
    pub const MEMORY_RESERVE_LARGE: u64 = 1024 * 1024 * 1024;

    /// System reserve on constrained-virtual-address (32-bit) systems.
    pub const MEMORY_RESERVE_SMALL: u64 = 128 * 1024 * 1024;

    /// Startup cap on the memory ceiling regardless of installed RAM.
    pub const MEMORY_MAX_STARTUP_CAP: u64 = 1024 * 1024 * 1024;
}
