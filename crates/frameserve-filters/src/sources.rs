//! Deterministic leaf producers.

use frameserve_core::{frame, FrameHandle, Plane, Result, VideoInfo};
use frameserve_runtime::{Runtime, VideoFilter};

/// Fills every plane with a constant byte value.
pub struct SolidColorSource {
    info: VideoInfo,
    luma: u8,
    chroma_u: u8,
    chroma_v: u8,
}

impl SolidColorSource {
    pub fn new(info: VideoInfo, luma: u8, chroma_u: u8, chroma_v: u8) -> Self {
        Self {
            info,
            luma,
            chroma_u,
            chroma_v,
        }
    }
}

impl VideoFilter for SolidColorSource {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, _n: usize, env: &Runtime) -> Result<FrameHandle> {
        let mut handle = env.new_video_frame(&self.info, 0)?;
        let out = frame::writable(&mut handle)?;
        out.plane_mut(Plane::Primary)?.fill(self.luma);
        if out.layout().chroma.is_some() {
            out.plane_mut(Plane::U)?.fill(self.chroma_u);
            out.plane_mut(Plane::V)?.fill(self.chroma_v);
        }
        Ok(handle)
    }
}

/// Classic eight-bar color pattern in packed RGBA.
pub struct ColorBarsSource {
    info: VideoInfo,
}

impl ColorBarsSource {
    /// `info` must describe a packed RGBA stream.
    pub fn new(info: VideoInfo) -> Self {
        Self { info }
    }
}

const BAR_COLORS: [[u8; 4]; 8] = [
    [255, 255, 255, 255], // White
    [255, 255, 0, 255],   // Yellow
    [0, 255, 255, 255],   // Cyan
    [0, 255, 0, 255],     // Green
    [255, 0, 255, 255],   // Magenta
    [255, 0, 0, 255],     // Red
    [0, 0, 255, 255],     // Blue
    [0, 0, 0, 255],       // Black
];

impl VideoFilter for ColorBarsSource {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, _n: usize, env: &Runtime) -> Result<FrameHandle> {
        let width = self.info.width as usize;
        let mut handle = env.new_video_frame(&self.info, 0)?;
        let out = frame::writable(&mut handle)?;
        let pitch = out.pitch(Plane::Primary);
        let height = out.height(Plane::Primary);
        let bytes = out.plane_mut(Plane::Primary)?;
        for y in 0..height {
            let row = &mut bytes[y * pitch..y * pitch + width * 4];
            for x in 0..width {
                let bar = (x * 8 / width).min(7);
                row[x * 4..x * 4 + 4].copy_from_slice(&BAR_COLORS[bar]);
            }
        }
        Ok(handle)
    }
}
