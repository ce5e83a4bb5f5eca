//! Video and audio stream descriptions.
//!
//! Frame rates use rational numbers to avoid floating-point accumulation
//! errors over long clips.

use crate::error::{FrameServeError, Result};
use num_rational::Rational64;
use serde::{Deserialize, Serialize};

/// Frame rate as a rational number (e.g., 24000/1001 for 23.976 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    /// Numerator (e.g., 24000)
    pub numerator: u32,
    /// Denominator (e.g., 1001)
    pub denominator: u32,
}

impl FrameRate {
    /// Create a new frame rate.
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_25: Self = Self::new(25, 1);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const NTSC_FILM: Self = Self::new(24000, 1001);
    pub const NTSC_VIDEO: Self = Self::new(30000, 1001);

    /// Frames per second as f64.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Duration of `frames` frames, in seconds, as an exact rational.
    pub fn frames_to_seconds(self, frames: i64) -> Rational64 {
        Rational64::new(frames * self.denominator as i64, self.numerator as i64)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::FPS_24
    }
}

/// How pixel samples are laid out in a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelLayout {
    /// A single interleaved plane, `bytes_per_pixel` bytes per pixel.
    Packed { bytes_per_pixel: usize },
    /// One luma plane plus two chroma planes subsampled by `1 << sub_x`
    /// horizontally and `1 << sub_y` vertically.
    Planar {
        sub_x: u32,
        sub_y: u32,
        bytes_per_sample: usize,
        /// True when the V plane precedes the U plane in the buffer.
        v_plane_first: bool,
    },
}

impl PixelLayout {
    /// 8-bit 4:2:0 planar with V before U (YV12).
    pub const YV12: Self = Self::Planar {
        sub_x: 1,
        sub_y: 1,
        bytes_per_sample: 1,
        v_plane_first: true,
    };

    /// 8-bit 4:2:2 planar (YV16).
    pub const YV16: Self = Self::Planar {
        sub_x: 1,
        sub_y: 0,
        bytes_per_sample: 1,
        v_plane_first: true,
    };

    /// 8-bit 4:4:4 planar (YV24).
    pub const YV24: Self = Self::Planar {
        sub_x: 0,
        sub_y: 0,
        bytes_per_sample: 1,
        v_plane_first: true,
    };

    /// 32-bit packed RGBA.
    pub const RGB32: Self = Self::Packed { bytes_per_pixel: 4 };

    /// 8-bit single-plane grayscale.
    pub const GRAY8: Self = Self::Packed { bytes_per_pixel: 1 };

    /// Whether this layout carries separate chroma planes.
    #[inline]
    pub fn is_planar(self) -> bool {
        matches!(self, Self::Planar { .. })
    }
}

/// Audio stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_channel_sample: usize,
    pub num_samples: i64,
}

impl AudioInfo {
    /// Bytes for one interleaved sample across all channels.
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.channels as usize * self.bytes_per_channel_sample
    }
}

/// Description of a video stream: dimensions, frame count, rate, layout,
/// and optional audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub num_frames: usize,
    pub fps: FrameRate,
    pub layout: PixelLayout,
    pub audio: Option<AudioInfo>,
}

impl VideoInfo {
    /// YV12 stream with no audio.
    pub fn yv12(width: u32, height: u32, num_frames: usize, fps: FrameRate) -> Self {
        Self {
            width,
            height,
            num_frames,
            fps,
            layout: PixelLayout::YV12,
            audio: None,
        }
    }

    /// Packed RGB32 stream with no audio.
    pub fn rgb32(width: u32, height: u32, num_frames: usize, fps: FrameRate) -> Self {
        Self {
            width,
            height,
            num_frames,
            fps,
            layout: PixelLayout::RGB32,
            audio: None,
        }
    }

    pub fn with_audio(mut self, audio: AudioInfo) -> Self {
        self.audio = Some(audio);
        self
    }

    #[inline]
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Bytes per row of the primary plane, without padding.
    pub fn row_size(&self) -> usize {
        match self.layout {
            PixelLayout::Packed { bytes_per_pixel } => self.width as usize * bytes_per_pixel,
            PixelLayout::Planar {
                bytes_per_sample, ..
            } => self.width as usize * bytes_per_sample,
        }
    }

    /// Bytes per row of a chroma plane, or 0 for packed layouts.
    pub fn chroma_row_size(&self) -> usize {
        match self.layout {
            PixelLayout::Packed { .. } => 0,
            PixelLayout::Planar {
                sub_x,
                bytes_per_sample,
                ..
            } => (self.width as usize >> sub_x) * bytes_per_sample,
        }
    }

    /// Rows in a chroma plane, or 0 for packed layouts.
    pub fn chroma_height(&self) -> usize {
        match self.layout {
            PixelLayout::Packed { .. } => 0,
            PixelLayout::Planar { sub_y, .. } => self.height as usize >> sub_y,
        }
    }

    /// Bytes for one interleaved audio sample, or 0 without audio.
    pub fn bytes_per_audio_sample(&self) -> usize {
        self.audio.map(|a| a.bytes_per_sample()).unwrap_or(0)
    }

    /// Validate that the dimensions satisfy the layout's subsampling modulus.
    pub fn validate_dimensions(&self) -> Result<()> {
        if let PixelLayout::Planar { sub_x, sub_y, .. } = self.layout {
            let xmod = 1u32 << sub_x;
            if self.width & (xmod - 1) != 0 {
                return Err(FrameServeError::InvalidParameter(format!(
                    "planar frame width {} is not mod{}",
                    self.width, xmod
                )));
            }
            let ymod = 1u32 << sub_y;
            if self.height & (ymod - 1) != 0 {
                return Err(FrameServeError::InvalidParameter(format!(
                    "planar frame height {} is not mod{}",
                    self.height, ymod
                )));
            }
        }
        Ok(())
    }
}
