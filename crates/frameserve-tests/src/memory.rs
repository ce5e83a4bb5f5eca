//! Global memory budget: ceiling enforcement, pool reuse, grow/shrink
//! fairness across caches.

use crate::support::{big_rgb, hint_value, runtime, small_rgb};
use frameserve_filters::FrameCounterSource;
use frameserve_runtime::{CacheFilter, CacheHint, VideoFilter};
use std::sync::Arc;

#[test]
fn test_memory_ceiling_shrinks_caches_under_pressure() {
    let env = runtime(); // 64 MiB ceiling
    let source = Arc::new(FrameCounterSource::new(big_rgb(100))); // 4 MiB frames
    let cached = CacheFilter::wrap(source, &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(32));

    for n in 0..20 {
        let frame = cached.get_frame(n, &env).unwrap();
        assert_eq!(FrameCounterSource::stamp_of(&frame), n as u64);
        assert!(
            env.memory_used() <= env.memory_max(),
            "usage {} exceeded ceiling {} at frame {}",
            env.memory_used(),
            env.memory_max(),
            n
        );
    }
    // The cache was forced below its configured bound.
    assert!(hint_value(&cached, CacheHint::GetSize) < 20);
    assert!(hint_value(&cached, CacheHint::GetMaxCapacity) < 32);
}

#[test]
fn test_retired_frames_are_pooled_and_reused() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(big_rgb(100)));

    let frame = source.get_frame(0, &env).unwrap();
    let size = frame.buffer_size();
    let seq = frame.buffer_sequence();
    let used = env.memory_used();
    drop(frame);
    assert_eq!(env.pooled_buffers(), 1);

    // The next same-sized request reuses the pooled buffer: no new
    // allocation, and the change sequence has advanced.
    let frame = source.get_frame(1, &env).unwrap();
    assert_eq!(frame.buffer_size(), size);
    assert_eq!(env.memory_used(), used);
    assert!(frame.buffer_sequence() > seq);
}

#[test]
fn test_expansion_takes_slot_from_idle_cache_when_tight() {
    let env = runtime();
    let max = env.memory_max();

    let idle_source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let idle = CacheFilter::wrap(idle_source, &env);
    idle.set_cache_hints(CacheHint::SetMaxCapacity(2));
    idle.get_frame(0, &env).unwrap();
    idle.get_frame(1, &env).unwrap();
    assert_eq!(hint_value(&idle, CacheHint::GetSize), 2);

    let busy_source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let busy = CacheFilter::wrap(busy_source, &env);
    busy.set_cache_hints(CacheHint::SetMaxCapacity(2));
    // Work the busy cache past its capacity until a repeat miss raises its
    // requested capacity above the enforced bound.
    busy.get_frame(0, &env).unwrap();
    busy.get_frame(1, &env).unwrap();
    busy.get_frame(2, &env).unwrap();
    busy.get_frame(0, &env).unwrap();
    assert!(
        hint_value(&busy, CacheHint::GetRequestedCapacity)
            > hint_value(&busy, CacheHint::GetCapacity)
    );

    // Less than 10% slack remains: the grant must take a slot from the
    // least-recently-touched other cache first.
    env.adjust_memory_consumption(max * 95 / 100, false);
    busy.get_frame(2, &env).unwrap();

    assert_eq!(hint_value(&busy, CacheHint::GetMaxCapacity), 3);
    assert_eq!(hint_value(&idle, CacheHint::GetSize), 1);
    assert_eq!(hint_value(&idle, CacheHint::GetMaxCapacity), 1);

    env.adjust_memory_consumption(max * 95 / 100, true);
}

#[test]
fn test_expansion_granted_without_victim_when_others_empty() {
    let env = runtime();
    let max = env.memory_max();

    let idle_source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let idle = CacheFilter::wrap(idle_source, &env);
    idle.set_cache_hints(CacheHint::SetMaxCapacity(0));
    assert_eq!(hint_value(&idle, CacheHint::GetSize), 0);

    let busy_source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let busy = CacheFilter::wrap(busy_source, &env);
    busy.set_cache_hints(CacheHint::SetMaxCapacity(2));
    busy.get_frame(0, &env).unwrap();
    busy.get_frame(1, &env).unwrap();
    busy.get_frame(2, &env).unwrap();
    busy.get_frame(0, &env).unwrap();

    env.adjust_memory_consumption(max * 95 / 100, false);
    busy.get_frame(2, &env).unwrap();

    // The empty cache was not shrunk (nothing to take), and the grant went
    // through regardless.
    assert_eq!(hint_value(&idle, CacheHint::GetMaxCapacity), 0);
    assert_eq!(hint_value(&busy, CacheHint::GetMaxCapacity), 3);

    env.adjust_memory_consumption(max * 95 / 100, true);
}

#[test]
fn test_memory_used_drops_when_pool_purged_under_pressure() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(big_rgb(100)));

    // Ten retired 4 MiB buffers sit in the pool, all accounted for.
    let frames: Vec<_> = (0..10)
        .map(|n| source.get_frame(n, &env).unwrap())
        .collect();
    drop(frames);
    assert_eq!(env.pooled_buffers(), 10);
    let pooled_bytes = env.memory_used();
    assert!(pooled_bytes > 10 * 4 * 1024 * 1024 - 1024);

    // A cache under pressure triggers a global free of unused buffers.
    let cached = CacheFilter::wrap(source.clone(), &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(32));
    for n in 0..20 {
        cached.get_frame(n, &env).unwrap();
    }
    assert!(env.memory_used() <= env.memory_max());
}
