//! Shared fixtures for the integration tests.

use frameserve_core::{AudioInfo, FrameHandle, FrameRate, Result, VideoInfo};
use frameserve_runtime::{CacheHint, HintReply, Runtime, RuntimeConfig, VideoFilter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig {
        threads: Some(2),
        memory_max_mib: Some(64),
        ..Default::default()
    })
    .unwrap()
}

pub fn small_rgb(num_frames: usize) -> VideoInfo {
    VideoInfo::rgb32(16, 4, num_frames, FrameRate::FPS_24)
}

/// 4 MiB per frame; big enough to drive the 64 MiB test ceiling.
pub fn big_rgb(num_frames: usize) -> VideoInfo {
    VideoInfo::rgb32(1024, 1024, num_frames, FrameRate::FPS_24)
}

pub fn hint_value(filter: &Arc<dyn VideoFilter>, hint: CacheHint) -> usize {
    match filter.set_cache_hints(hint) {
        HintReply::Value(n) => n,
        other => panic!("expected a value reply, got {other:?}"),
    }
}

/// Source whose audio ramps through sample indices, counting deliveries.
pub struct AudioRampSource {
    info: VideoInfo,
    audio_calls: AtomicUsize,
}

impl AudioRampSource {
    pub fn new(num_samples: i64) -> Self {
        let info = VideoInfo::rgb32(16, 4, 10, FrameRate::FPS_24).with_audio(AudioInfo {
            sample_rate: 48_000,
            channels: 1,
            bytes_per_channel_sample: 1,
            num_samples,
        });
        Self {
            info,
            audio_calls: AtomicUsize::new(0),
        }
    }

    pub fn audio_calls(&self) -> usize {
        self.audio_calls.load(Ordering::SeqCst)
    }
}

impl VideoFilter for AudioRampSource {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, _n: usize, env: &Runtime) -> Result<FrameHandle> {
        env.new_video_frame(&self.info, 0)
    }

    fn get_audio(&self, buf: &mut [u8], start: i64, count: i64, _env: &Runtime) -> Result<()> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        for (i, byte) in buf.iter_mut().take(count as usize).enumerate() {
            *byte = (start + i as i64) as u8;
        }
        Ok(())
    }
}

/// A node that manages its own caching and refuses to be wrapped.
pub struct SelfCachingSource {
    info: VideoInfo,
}

impl SelfCachingSource {
    pub fn new(info: VideoInfo) -> Self {
        Self { info }
    }
}

impl VideoFilter for SelfCachingSource {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, _n: usize, env: &Runtime) -> Result<FrameHandle> {
        env.new_video_frame(&self.info, 0)
    }

    fn set_cache_hints(&self, hint: CacheHint) -> HintReply {
        match hint {
            CacheHint::DontCacheMe => HintReply::Ack,
            _ => HintReply::Unhandled,
        }
    }
}
