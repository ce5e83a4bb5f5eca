//! End-to-end graphs: sources, caches, and transforms composed.

use crate::support::{hint_value, runtime, small_rgb, SelfCachingSource};
use frameserve_core::{FrameRate, Plane, VideoInfo};
use frameserve_filters::{ColorBarsSource, Crop, FrameCounterSource};
use frameserve_runtime::{CacheFilter, CacheHint, VideoFilter};
use std::sync::Arc;

#[test]
fn test_cache_opt_out_leaves_node_unwrapped() {
    let env = runtime();
    let source: Arc<dyn VideoFilter> = Arc::new(SelfCachingSource::new(small_rgb(10)));
    let wrapped = CacheFilter::wrap(source.clone(), &env);
    assert!(Arc::ptr_eq(&source, &wrapped));
    assert!(!CacheFilter::is_cache(&wrapped));

    let plain: Arc<dyn VideoFilter> = Arc::new(FrameCounterSource::new(small_rgb(10)));
    let wrapped = CacheFilter::wrap(plain, &env);
    assert!(CacheFilter::is_cache(&wrapped));
}

#[test]
fn test_caches_do_not_nest() {
    let env = runtime();
    let source: Arc<dyn VideoFilter> = Arc::new(FrameCounterSource::new(small_rgb(10)));
    let cached = CacheFilter::wrap(source, &env);
    let again = CacheFilter::wrap(cached.clone(), &env);
    assert!(Arc::ptr_eq(&cached, &again));
}

#[test]
fn test_crop_over_cache_shares_cached_buffers() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)));
    let cached = CacheFilter::wrap(source.clone(), &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(4));

    let crop = Crop::new(cached.clone(), 0, 0, 8, 2).unwrap();
    let cropped = crop.get_frame(5, &env).unwrap();
    // Cropping from the origin preserves the stamp, and the view shares the
    // cached frame's buffer instead of copying.
    assert_eq!(FrameCounterSource::stamp_of(&cropped), 5);
    assert_eq!(source.productions(), 1);

    let again = crop.get_frame(5, &env).unwrap();
    assert_eq!(FrameCounterSource::stamp_of(&again), 5);
    assert_eq!(source.productions(), 1);
    assert_eq!(again.buffer_sequence(), cropped.buffer_sequence());
}

#[test]
fn test_bars_crop_cache_pipeline() {
    let env = runtime();
    let vi = VideoInfo::rgb32(64, 8, 24, FrameRate::FPS_24);
    let bars: Arc<dyn VideoFilter> = Arc::new(ColorBarsSource::new(vi));
    let cached_bars = CacheFilter::wrap(bars, &env);
    cached_bars.set_cache_hints(CacheHint::SetMaxCapacity(4));

    let crop = Arc::new(Crop::new(cached_bars, 56, 0, 8, 8).unwrap());
    let cached_crop = CacheFilter::wrap(crop, &env);
    cached_crop.set_cache_hints(CacheHint::SetMaxCapacity(4));

    let frame = cached_crop.get_frame(0, &env).unwrap();
    // The last eighth of the bars is black.
    let bytes = frame.plane(Plane::Primary).unwrap();
    assert_eq!(&bytes[0..4], &[0, 0, 0, 255]);
    assert_eq!(frame.row_size(Plane::Primary), 32);

    assert_eq!(hint_value(&cached_crop, CacheHint::GetSize), 1);
    assert!(env.memory_used() > 0);
}

#[test]
fn test_sibling_requests_unaffected_by_failure() {
    let env = runtime();
    let source = Arc::new(FrameCounterSource::new(small_rgb(100)).fail_on(2));
    let cached = CacheFilter::wrap(source, &env);
    cached.set_cache_hints(CacheHint::SetMaxCapacity(8));

    assert!(cached.get_frame(1, &env).is_ok());
    assert!(cached.get_frame(2, &env).is_err());
    assert!(cached.get_frame(3, &env).is_ok());
    // The failure left no residue: frame 1 and 3 still served from cache.
    assert_eq!(hint_value(&cached, CacheHint::GetSize), 2);
}

#[test]
fn test_parity_passes_through_cache() {
    let env = runtime();
    let source: Arc<dyn VideoFilter> = Arc::new(FrameCounterSource::new(small_rgb(10)));
    let cached = CacheFilter::wrap(source, &env);
    assert!(!cached.get_parity(0));
}
