//! Worker pool fan-out and MT-guard coordination.

use crate::support::{runtime, small_rgb};
use frameserve_core::{FrameHandle, FrameServeError, Result, VideoInfo};
use frameserve_filters::FrameCounterSource;
use frameserve_runtime::{MtGuard, MtMode, Runtime, VideoFilter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_parallel_frame_fan_out() {
    let env = runtime();
    let source: Arc<dyn VideoFilter> = Arc::new(FrameCounterSource::new(small_rgb(100)));

    let completion = env.new_completion::<Result<FrameHandle>>(8);
    for n in 0..8usize {
        let slot = completion.add().unwrap();
        let source = source.clone();
        let env_clone = env.clone();
        env.parallel_job(slot, move || source.get_frame(n, &env_clone));
    }
    completion.wait();

    for n in 0..8usize {
        let frame = completion.take(n).unwrap().unwrap();
        assert_eq!(FrameCounterSource::stamp_of(&frame), n as u64);
    }
}

#[test]
fn test_completion_overfill_is_hard_error() {
    let env = runtime();
    let completion = env.new_completion::<u32>(2);
    let a = completion.add().unwrap();
    let b = completion.add().unwrap();
    assert!(matches!(
        completion.add(),
        Err(FrameServeError::CompletionFull)
    ));
    a.fulfill(0);
    b.fulfill(1);
    completion.wait();
}

#[test]
fn test_completion_reuse_requires_reset() {
    let env = runtime();
    let completion = env.new_completion::<u64>(4);
    for i in 0..4u64 {
        let slot = completion.add().unwrap();
        env.parallel_job(slot, move || i * i);
    }
    completion.wait();
    assert_eq!(completion.get(3), Some(9));

    completion.reset();
    assert_eq!(completion.size(), 0);
    for i in 0..2u64 {
        let slot = completion.add().unwrap();
        env.parallel_job(slot, move || i + 100);
    }
    completion.wait();
    assert_eq!(completion.get(0), Some(100));
    assert_eq!(completion.get(1), Some(101));
    assert_eq!(completion.get(2), None);
}

/// Records the peak number of concurrent `get_frame` calls.
struct ConcurrencyProbe {
    info: VideoInfo,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn new(info: VideoInfo) -> Self {
        Self {
            info,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl VideoFilter for ConcurrencyProbe {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, _n: usize, env: &Runtime) -> Result<FrameHandle> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let result = env.new_video_frame(&self.info, 0);
        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[test]
fn test_serialized_filter_never_runs_concurrently() {
    let env = runtime();
    let probe = Arc::new(ConcurrencyProbe::new(small_rgb(100)));
    let guarded = MtGuard::wrap(probe.clone(), MtMode::Serialized, &env);
    env.install_prefetcher(4).unwrap();

    let mut handles = Vec::new();
    for n in 0..4usize {
        let guarded = guarded.clone();
        let env = env.clone();
        handles.push(std::thread::spawn(move || {
            guarded.get_frame(n, &env).unwrap();
        }));
    }
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn test_nice_filter_passes_through_unguarded() {
    let env = runtime();
    let probe: Arc<dyn VideoFilter> = Arc::new(ConcurrencyProbe::new(small_rgb(100)));
    let wrapped = MtGuard::wrap(probe.clone(), MtMode::NiceFilter, &env);
    assert!(Arc::ptr_eq(&probe, &wrapped));
}
