//! FrameServe - demo frame-serving host
//!
//! Builds a small filter graph (color bars, cached, cropped, cached again)
//! and serves frames through the runtime: once fanned out across the worker
//! pool, once sequentially to replay from the caches. Pass a JSON runtime
//! config file as the first argument to override the defaults.

use anyhow::{Context, Result};
use frameserve_core::{FrameHandle, FrameRate, VideoInfo};
use frameserve_filters::{ColorBarsSource, Crop};
use frameserve_runtime::{CacheFilter, CacheHint, HintReply, Runtime, RuntimeConfig, VideoFilter};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("FrameServe starting...");

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            serde_json::from_str::<RuntimeConfig>(&text)
                .with_context(|| format!("parsing config {path}"))?
        }
        None => RuntimeConfig::default(),
    };
    let env = Runtime::with_config(config)?;

    // bars -> cache -> crop -> cache
    let vi = VideoInfo::rgb32(1280, 720, 240, FrameRate::FPS_24);
    let bars: Arc<dyn VideoFilter> = Arc::new(ColorBarsSource::new(vi));
    let cached_bars = CacheFilter::wrap(bars, &env);
    cached_bars.set_cache_hints(CacheHint::SetMaxCapacity(16));
    let crop = Arc::new(Crop::new(cached_bars, 160, 90, 960, 540)?);
    let graph = CacheFilter::wrap(crop, &env);
    graph.set_cache_hints(CacheHint::SetMaxCapacity(16));

    // Fan one batch out across the worker pool.
    let batch = 24usize;
    let completion = env.new_completion::<frameserve_core::Result<FrameHandle>>(batch);
    for n in 0..batch {
        let slot = completion.add()?;
        let graph = graph.clone();
        let worker_env = env.clone();
        env.parallel_job(slot, move || graph.get_frame(n, &worker_env));
    }
    completion.wait();
    for n in 0..batch {
        if let Some(result) = completion.take(n) {
            result?;
        }
    }

    // Replay the same frames; these resolve from the caches.
    for n in 0..batch {
        graph.get_frame(n, &env)?;
    }

    if let HintReply::Value(size) = graph.set_cache_hints(CacheHint::GetSize) {
        info!(cached_frames = size, "front cache populated");
    }
    info!(
        frames = batch,
        memory_used_mib = env.memory_used() / (1024 * 1024),
        memory_max_mib = env.memory_max() / (1024 * 1024),
        "done"
    );

    Ok(())
}
