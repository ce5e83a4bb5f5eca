//! Cache node behavior: single-flight, rollback, growth, hints, audio.

use crate::support::{hint_value, runtime, small_rgb, AudioRampSource};
use frameserve_core::frame;
use frameserve_filters::FrameCounterSource;
use frameserve_runtime::{CacheFilter, CacheHint, CachePolicy, HintReply, VideoFilter};
use std::sync::Arc;

#[test]
fn test_hit_skips_recomputation() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source.clone(), &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(4));

    let first = cached.get_frame(2, &env).unwrap();
    let second = cached.get_frame(2, &env).unwrap();
    assert_eq!(source.productions(), 1);
    assert_eq!(FrameCounterSource::stamp_of(&first), 2);
    assert_eq!(FrameCounterSource::stamp_of(&second), 2);
}

#[test]
fn test_out_of_range_requests_clamped() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(10)));
    let cached = CacheFilter::wrap(source, &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(4));

    let frame = cached.get_frame(500, &env).unwrap();
    assert_eq!(FrameCounterSource::stamp_of(&frame), 9);
}

#[test]
fn test_producer_failure_rolls_back_and_allows_retry() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)).fail_on(3));
    let cached = CacheFilter::wrap(source.clone(), &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(4));

    assert!(cached.get_frame(3, &env).is_err());
    // The reservation was rolled back: the next request reaches the
    // producer again instead of deadlocking on a stuck entry.
    assert!(cached.get_frame(3, &env).is_err());
    assert_eq!(source.productions(), 2);
    // Other keys are unaffected.
    assert!(cached.get_frame(4, &env).is_ok());
}

#[test]
fn test_single_flight_through_cache_node() {
    use std::thread;

    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source.clone(), &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(8));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cached = cached.clone();
        let env = env.clone();
        handles.push(thread::spawn(move || {
            let frame = cached.get_frame(7, &env).unwrap();
            FrameCounterSource::stamp_of(&frame)
        }));
    }
    for h in handles {
        assert_eq!(h.join().unwrap(), 7);
    }
    assert_eq!(source.productions(), 1);
}

#[test]
fn test_cache_grows_from_pass_through_on_repeat_access() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source.clone(), &env);

    // Capacity starts at zero: pass-through, every request recomputes.
    assert_eq!(hint_value(&cached, CacheHint::GetCapacity), 0);
    cached.get_frame(0, &env).unwrap();
    cached.get_frame(0, &env).unwrap();
    // The repeat miss raised the requested capacity; the next access asks
    // the runtime for a slot and starts caching.
    cached.get_frame(0, &env).unwrap();
    assert!(hint_value(&cached, CacheHint::GetCapacity) >= 1);
    let before = source.productions();
    cached.get_frame(0, &env).unwrap();
    assert_eq!(source.productions(), before);
}

#[test]
fn test_cached_frames_are_not_writable() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source, &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(4));

    // The cache retains a reference, so the returned handle is shared.
    let mut handle = cached.get_frame(1, &env).unwrap();
    assert!(!frame::is_writable(&handle));
    assert!(env.make_writable(&mut handle).unwrap());
    assert!(frame::is_writable(&handle));
}

#[test]
fn test_hint_protocol_queries() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source, &env);

    assert!(matches!(
        cached.set_cache_hints(CacheHint::IsCacheQuery),
        HintReply::IsCache
    ));
    assert!(matches!(
        cached.set_cache_hints(CacheHint::GetPolicy),
        HintReply::Policy(CachePolicy::Generic)
    ));

    cached.set_cache_hints(CacheHint::SetMinCapacity(1));
    cached.set_cache_hints(CacheHint::SetMaxCapacity(5));
    assert_eq!(hint_value(&cached, CacheHint::GetMinCapacity), 1);
    assert_eq!(hint_value(&cached, CacheHint::GetMaxCapacity), 5);
    assert_eq!(hint_value(&cached, CacheHint::GetSize), 0);

    // Windows below the minimum are raised to 2.
    cached.set_cache_hints(CacheHint::Window(1));
    assert_eq!(hint_value(&cached, CacheHint::GetWindow), 2);
    cached.set_cache_hints(CacheHint::Window(6));
    assert_eq!(hint_value(&cached, CacheHint::GetWindow), 6);
}

#[test]
fn test_capacity_bound_holds_across_misses() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source, &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(3));

    for n in 0..20 {
        cached.get_frame(n, &env).unwrap();
        assert!(hint_value(&cached, CacheHint::GetSize) <= 3);
    }
}

#[test]
fn test_audio_span_cache_serves_repeat_reads() {
    let env = runtime();
    let source = Arc::new(AudioRampSource::new(1000));
    let cached = CacheFilter::wrap(source.clone(), &env);

    assert!(matches!(
        cached.set_cache_hints(CacheHint::ConfigureAudioCache(0)),
        HintReply::Ack
    ));
    assert_eq!(
        hint_value(&cached, CacheHint::GetAudioSize),
        256 * 1024
    );

    let mut buf = vec![0u8; 100];
    cached.get_audio(&mut buf, 0, 100, &env).unwrap();
    assert_eq!(buf[0], 0);
    assert_eq!(buf[99], 99);
    assert_eq!(source.audio_calls(), 1);

    // Contained re-reads come from the cached span.
    cached.get_audio(&mut buf[..10], 50, 10, &env).unwrap();
    assert_eq!(buf[0], 50);
    assert_eq!(source.audio_calls(), 1);

    // Disabling frees the buffer and reverts to pass-through.
    cached.set_cache_hints(CacheHint::DisableAudioCache);
    assert!(matches!(
        cached.set_cache_hints(CacheHint::GetAudioPolicy),
        HintReply::Policy(CachePolicy::AudioNone)
    ));
    assert_eq!(hint_value(&cached, CacheHint::GetAudioSize), 0);
    cached.get_audio(&mut buf[..10], 50, 10, &env).unwrap();
    assert_eq!(source.audio_calls(), 2);
}

#[test]
fn test_audio_cache_unhandled_without_audio() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source, &env);
    assert!(matches!(
        cached.set_cache_hints(CacheHint::ConfigureAudioCache(1024)),
        HintReply::Unhandled
    ));
}
