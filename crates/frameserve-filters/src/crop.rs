//! Crop transform built on subframe views.
//!
//! No pixels are copied: the output frame is a re-based view into the
//! child's frame buffer.

use frameserve_core::{FrameHandle, FrameServeError, PixelLayout, Plane, Result, VideoInfo};
use frameserve_runtime::{Runtime, VideoFilter};
use std::sync::Arc;

pub struct Crop {
    child: Arc<dyn VideoFilter>,
    info: VideoInfo,
    left: u32,
    top: u32,
}

impl Crop {
    pub fn new(
        child: Arc<dyn VideoFilter>,
        left: u32,
        top: u32,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let src_info = child.video_info();
        if left + width > src_info.width || top + height > src_info.height {
            return Err(FrameServeError::InvalidParameter(format!(
                "crop {}x{}+{}+{} exceeds source {}x{}",
                width, height, left, top, src_info.width, src_info.height
            )));
        }
        let mut info = src_info.clone();
        info.width = width;
        info.height = height;
        info.validate_dimensions()?;
        if let PixelLayout::Planar { sub_x, sub_y, .. } = info.layout {
            if left & ((1 << sub_x) - 1) != 0 || top & ((1 << sub_y) - 1) != 0 {
                return Err(FrameServeError::InvalidParameter(
                    "crop origin does not satisfy the chroma subsampling modulus".into(),
                ));
            }
        }
        Ok(Self {
            child,
            info,
            left,
            top,
        })
    }
}

impl VideoFilter for Crop {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, n: usize, env: &Runtime) -> Result<FrameHandle> {
        let src = self.child.get_frame(n, env)?;
        let left = self.left as usize;
        let top = self.top as usize;
        match self.info.layout {
            PixelLayout::Packed { bytes_per_pixel } => {
                let pitch = src.pitch(Plane::Primary);
                let rel = (top * pitch + left * bytes_per_pixel) as isize;
                env.subframe(
                    &src,
                    rel,
                    pitch,
                    self.info.row_size(),
                    self.info.height as usize,
                )
            }
            PixelLayout::Planar {
                sub_x,
                sub_y,
                bytes_per_sample,
                ..
            } => {
                let pitch_y = src.pitch(Plane::Primary);
                let pitch_uv = src.pitch(Plane::U);
                let rel_y = (top * pitch_y + left * bytes_per_sample) as isize;
                let rel_uv =
                    ((top >> sub_y) * pitch_uv + (left >> sub_x) * bytes_per_sample) as isize;
                env.subframe_planar(
                    &src,
                    rel_y,
                    pitch_y,
                    self.info.row_size(),
                    self.info.height as usize,
                    rel_uv,
                    rel_uv,
                    pitch_uv,
                    self.info.chroma_row_size(),
                    self.info.chroma_height(),
                )
            }
        }
    }

    fn get_parity(&self, n: usize) -> bool {
        self.child.get_parity(n)
    }
}
