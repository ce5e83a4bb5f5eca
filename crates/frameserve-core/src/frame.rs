//! Frame buffers and frame views.
//!
//! A [`FrameBuffer`] owns a raw pixel byte region. A [`Frame`] is a
//! lightweight view into one buffer: an offset/pitch/row-size/height
//! quadruple for the primary plane plus optional chroma planes. Frames are
//! shared as [`FrameHandle`]s (`Arc<Frame>`); buffers are shared between a
//! frame and any subframes derived from it. Shared ownership doubles as the
//! refcount observable: a frame is writable exactly when both its own handle
//! and its buffer are uniquely held.
//!
//! When the last handle to a frame drops, the buffer is offered back to the
//! allocator through the [`BufferRecycler`] seam instead of being freed, so
//! a pool sized to past requests can serve future allocations.

use crate::error::{FrameServeError, Result};
use std::sync::{Arc, Weak};

/// Round `n` up to the next multiple of `align`.
#[inline]
pub fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) / align * align
}

/// Sink for retired buffers. Implemented by the runtime's frame allocator.
pub trait BufferRecycler: Send + Sync {
    fn recycle(&self, buffer: FrameBuffer);
}

/// A reference-counted pixel byte region.
///
/// The sequence number increments every time the allocator hands the buffer
/// out and again when it is retired to the pool, so any holder of state
/// derived from the buffer can detect that the region has been recycled.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Box<[u8]>,
    sequence: u64,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `size` bytes, or `None` if the system
    /// allocator refuses.
    pub fn try_allocate(size: usize) -> Option<Self> {
        let mut data: Vec<u8> = Vec::new();
        data.try_reserve_exact(size).ok()?;
        data.resize(size, 0);
        Some(Self {
            data: data.into_boxed_slice(),
            sequence: 0,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Advance the change-sequence number. Called by the allocator when the
    /// buffer is handed out or retired.
    pub fn bump_sequence(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Geometry of a single plane within a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaneDesc {
    pub offset: usize,
    pub pitch: usize,
    pub row_size: usize,
    pub height: usize,
}

impl PlaneDesc {
    /// Bytes from the plane's first to one past its last addressed byte.
    #[inline]
    pub fn span(&self) -> usize {
        if self.height == 0 {
            0
        } else {
            self.pitch * (self.height - 1) + self.row_size
        }
    }
}

/// Plane selector for [`Frame`] accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    Primary,
    U,
    V,
}

/// Full plane geometry of a frame: primary plane plus optional U/V chroma.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub primary: PlaneDesc,
    /// Chroma planes in U, V order, if present.
    pub chroma: Option<[PlaneDesc; 2]>,
}

impl PlaneLayout {
    pub fn packed(primary: PlaneDesc) -> Self {
        Self {
            primary,
            chroma: None,
        }
    }

    pub fn planar(primary: PlaneDesc, u: PlaneDesc, v: PlaneDesc) -> Self {
        Self {
            primary,
            chroma: Some([u, v]),
        }
    }

    fn desc(&self, plane: Plane) -> Option<PlaneDesc> {
        match plane {
            Plane::Primary => Some(self.primary),
            Plane::U => self.chroma.map(|c| c[0]),
            Plane::V => self.chroma.map(|c| c[1]),
        }
    }
}

/// A view over pixel memory for one video sample.
pub struct Frame {
    layout: PlaneLayout,
    // None only transiently while the frame is being dropped.
    buffer: Option<Arc<FrameBuffer>>,
    recycler: Weak<dyn BufferRecycler>,
}

/// Shared handle to a frame.
pub type FrameHandle = Arc<Frame>;

impl Frame {
    /// Wrap `buffer` with the given geometry. Fails if any plane falls
    /// outside the buffer.
    pub fn new(
        buffer: Arc<FrameBuffer>,
        layout: PlaneLayout,
        recycler: Weak<dyn BufferRecycler>,
    ) -> Result<Self> {
        validate_layout(&layout, buffer.size())?;
        Ok(Self {
            layout,
            buffer: Some(buffer),
            recycler,
        })
    }

    fn buf(&self) -> &Arc<FrameBuffer> {
        match &self.buffer {
            Some(b) => b,
            None => unreachable!("frame buffer detached outside drop"),
        }
    }

    #[inline]
    pub fn layout(&self) -> &PlaneLayout {
        &self.layout
    }

    /// The buffer's change-sequence number at the time of this call.
    pub fn buffer_sequence(&self) -> u64 {
        self.buf().sequence()
    }

    pub fn buffer_size(&self) -> usize {
        self.buf().size()
    }

    pub fn pitch(&self, plane: Plane) -> usize {
        self.layout.desc(plane).map(|d| d.pitch).unwrap_or(0)
    }

    pub fn row_size(&self, plane: Plane) -> usize {
        self.layout.desc(plane).map(|d| d.row_size).unwrap_or(0)
    }

    pub fn height(&self, plane: Plane) -> usize {
        self.layout.desc(plane).map(|d| d.height).unwrap_or(0)
    }

    /// Read access to a plane's bytes, or `None` if the plane is absent.
    pub fn plane(&self, plane: Plane) -> Option<&[u8]> {
        let desc = self.layout.desc(plane)?;
        Some(&self.buf().data()[desc.offset..desc.offset + desc.span()])
    }

    /// Mutable access to a plane's bytes. Fails if the plane is absent or
    /// the underlying buffer is shared with another frame.
    pub fn plane_mut(&mut self, plane: Plane) -> Result<&mut [u8]> {
        let desc = self.layout.desc(plane).ok_or_else(|| {
            FrameServeError::InvalidParameter("frame has no such plane".into())
        })?;
        let buffer = match &mut self.buffer {
            Some(b) => b,
            None => unreachable!("frame buffer detached outside drop"),
        };
        let inner = Arc::get_mut(buffer).ok_or_else(|| {
            FrameServeError::InvalidParameter("frame buffer is shared and not writable".into())
        })?;
        Ok(&mut inner.data_mut()[desc.offset..desc.offset + desc.span()])
    }

    /// Number of handles sharing the underlying buffer.
    pub fn buffer_ref_count(frame: &FrameHandle) -> usize {
        Arc::strong_count(frame.buf())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("layout", &self.layout)
            .field("buffer_size", &self.buffer_size())
            .field("sequence", &self.buffer_sequence())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            if let Ok(buffer) = Arc::try_unwrap(buffer) {
                if let Some(recycler) = self.recycler.upgrade() {
                    recycler.recycle(buffer);
                }
            }
        }
    }
}

/// A frame is writable iff nobody else can observe mutations: its own handle
/// and its buffer must both be uniquely held.
pub fn is_writable(frame: &FrameHandle) -> bool {
    Arc::strong_count(frame) == 1 && Arc::strong_count(frame.buf()) == 1
}

/// Mutable access to a uniquely-held frame.
pub fn writable(frame: &mut FrameHandle) -> Result<&mut Frame> {
    if !is_writable(frame) {
        return Err(FrameServeError::InvalidParameter(
            "frame is shared and not writable".into(),
        ));
    }
    Arc::get_mut(frame)
        .ok_or_else(|| FrameServeError::Internal("frame handle uniqueness lost".into()))
}

/// Derive a single-plane view over the same buffer with adjusted geometry.
/// Shares the buffer; the parent stops being writable while the subframe
/// lives.
pub fn subframe(
    parent: &FrameHandle,
    rel_offset: isize,
    new_pitch: usize,
    new_row_size: usize,
    new_height: usize,
) -> Result<FrameHandle> {
    let primary = shifted_desc(parent.layout.primary, rel_offset, new_pitch, new_row_size, new_height)?;
    let frame = Frame::new(
        parent.buf().clone(),
        PlaneLayout::packed(primary),
        parent.recycler.clone(),
    )?;
    Ok(Arc::new(frame))
}

/// Planar variant of [`subframe`]: the chroma planes are re-based with their
/// own offsets and pitch.
#[allow(clippy::too_many_arguments)]
pub fn subframe_planar(
    parent: &FrameHandle,
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
    let chroma = parent.layout.chroma.ok_or_else(|| {
        FrameServeError::InvalidParameter("subframe_planar on a frame without chroma".into())
    })?;
    let primary = shifted_desc(parent.layout.primary, rel_offset, new_pitch, new_row_size, new_height)?;
    let u = shifted_desc(chroma[0], rel_offset_u, new_pitch_uv, new_row_size_uv, new_height_uv)?;
    let v = shifted_desc(chroma[1], rel_offset_v, new_pitch_uv, new_row_size_uv, new_height_uv)?;
    let frame = Frame::new(
        parent.buf().clone(),
        PlaneLayout::planar(primary, u, v),
        parent.recycler.clone(),
    )?;
    Ok(Arc::new(frame))
}

fn shifted_desc(
    base: PlaneDesc,
    rel_offset: isize,
    pitch: usize,
    row_size: usize,
    height: usize,
) -> Result<PlaneDesc> {
    let offset = base.offset as isize + rel_offset;
    if offset < 0 {
        return Err(FrameServeError::InvalidParameter(
            "subframe offset underflows the buffer".into(),
        ));
    }
    if row_size > pitch && height > 1 {
        return Err(FrameServeError::InvalidParameter(
            "subframe row size exceeds pitch".into(),
        ));
    }
    Ok(PlaneDesc {
        offset: offset as usize,
        pitch,
        row_size,
        height,
    })
}

fn validate_layout(layout: &PlaneLayout, buffer_size: usize) -> Result<()> {
    let check = |desc: &PlaneDesc| -> Result<()> {
        let end = desc.offset + desc.span();
        if end > buffer_size {
            return Err(FrameServeError::InvalidParameter(format!(
                "plane extends to byte {} past buffer of {} bytes",
                end, buffer_size
            )));
        }
        Ok(())
    };
    check(&layout.primary)?;
    if let Some(chroma) = &layout.chroma {
        check(&chroma[0])?;
        check(&chroma[1])?;
    }
    Ok(())
}
