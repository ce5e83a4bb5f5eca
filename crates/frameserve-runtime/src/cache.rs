//! Cache node: interposes an LRU frame cache in front of a child node.
//!
//! Every `get_frame` first nudges the runtime's cache ranking (a plain touch,
//! or a grow request when the cache wants more capacity than it currently
//! has), then resolves through the LRU cache. A miss reserves the key,
//! produces via the child, and commits; a producer error rolls the
//! reservation back so the key can be retried. Audio gets a much simpler
//! treatment: one contiguous cached span of recently read samples.

use crate::filter::{CacheHint, CachePolicy, HintReply, VideoFilter};
use crate::lru_cache::{Lookup, LruCache};
use crate::registry::CacheId;
use crate::runtime::Runtime;
use frameserve_core::tuning::AUDIO_CACHE_DEFAULT_BYTES;
use frameserve_core::{AudioInfo, FrameHandle, Result, VideoInfo};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A filter-graph wrapper that caches its child's frames.
pub struct CacheFilter {
    child: Arc<dyn VideoFilter>,
    info: VideoInfo,
    env: Runtime,
    id: CacheId,
    video_cache: LruCache<usize, FrameHandle>,
    audio: Mutex<AudioCache>,
    window: AtomicUsize,
}

impl CacheFilter {
    /// Wrap `child` in a cache node, unless it opts out via `DontCacheMe`.
    pub fn wrap(child: Arc<dyn VideoFilter>, env: &Runtime) -> Arc<dyn VideoFilter> {
        if matches!(
            child.set_cache_hints(CacheHint::DontCacheMe),
            HintReply::Ack
        ) {
            return child;
        }
        let info = child.video_info().clone();
        let audio = AudioCache::new(info.audio);
        let id = env.allocate_cache_id();
        let node = Arc::new(CacheFilter {
            child,
            info,
            env: env.clone(),
            id,
            video_cache: LruCache::new(0),
            audio: Mutex::new(audio),
            window: AtomicUsize::new(2),
        });
        env.register_cache(id, Arc::downgrade(&node));
        node
    }

    /// Whether `filter` is a cache node, per the `IsCacheQuery` sentinel.
    pub fn is_cache(filter: &Arc<dyn VideoFilter>) -> bool {
        matches!(
            filter.set_cache_hints(CacheHint::IsCacheQuery),
            HintReply::IsCache
        )
    }
}

impl VideoFilter for CacheFilter {
    fn video_info(&self) -> &VideoInfo {
        &self.info
    }

    fn get_frame(&self, n: usize, env: &Runtime) -> Result<FrameHandle> {
        // Protect producers that cannot handle out-of-bounds frame indices.
        let n = n.min(self.info.num_frames.saturating_sub(1));

        if self.video_cache.requested_capacity() > self.video_cache.capacity() {
            env.nod_and_expand(self.id);
        } else {
            env.nod(self.id);
        }

        match self.video_cache.lookup(n, true) {
            Lookup::Hit(frame) => Ok(frame),
            Lookup::Miss(reservation) => match self.child.get_frame(n, env) {
                Ok(frame) => {
                    reservation.commit(frame.clone());
                    Ok(frame)
                }
                Err(err) => {
                    reservation.rollback();
                    Err(err)
                }
            },
            Lookup::NoCache | Lookup::Absent => self.child.get_frame(n, env),
        }
    }

    fn get_audio(&self, buf: &mut [u8], start: i64, count: i64, env: &Runtime) -> Result<()> {
        if count <= 0 {
            return Ok(());
        }
        let Some(audio_info) = self.info.audio else {
            return self.child.get_audio(buf, start, count, env);
        };
        let bytes_per_sample = audio_info.bytes_per_sample();
        let mut cache = self.audio.lock();
        if cache.policy != CachePolicy::Audio
            || cache.buf.is_empty()
            || bytes_per_sample == 0
            || start < 0
            || start + count > audio_info.num_samples
        {
            drop(cache);
            return self.child.get_audio(buf, start, count, env);
        }

        if start >= cache.span_start && start + count <= cache.span_start + cache.span_len {
            let offset = ((start - cache.span_start) as usize) * bytes_per_sample;
            let len = count as usize * bytes_per_sample;
            buf[..len].copy_from_slice(&cache.buf[offset..offset + len]);
            return Ok(());
        }

        let cap_samples = (cache.buf.len() / bytes_per_sample) as i64;
        if count <= cap_samples {
            // Refill the span from the child, then serve from it.
            let span = cap_samples.min(audio_info.num_samples - start);
            let span_bytes = span as usize * bytes_per_sample;
            self.child
                .get_audio(&mut cache.buf[..span_bytes], start, span, env)?;
            cache.span_start = start;
            cache.span_len = span;
            let len = count as usize * bytes_per_sample;
            buf[..len].copy_from_slice(&cache.buf[..len]);
            return Ok(());
        }

        drop(cache);
        self.child.get_audio(buf, start, count, env)
    }

    fn get_parity(&self, n: usize) -> bool {
        self.child.get_parity(n)
    }

    fn set_cache_hints(&self, hint: CacheHint) -> HintReply {
        match hint {
            CacheHint::IsCacheQuery => HintReply::IsCache,
            CacheHint::GetPolicy => HintReply::Policy(CachePolicy::Generic),
            // A cache never wraps another cache.
            CacheHint::DontCacheMe => HintReply::Ack,
            CacheHint::SetMinCapacity(min) => {
                let (_, max) = self.video_cache.limits();
                self.video_cache.set_limits(min, max);
                HintReply::Ack
            }
            CacheHint::SetMaxCapacity(max) => {
                let (min, _) = self.video_cache.limits();
                self.video_cache.set_limits(min, max);
                HintReply::Ack
            }
            CacheHint::GetMinCapacity => HintReply::Value(self.video_cache.limits().0),
            CacheHint::GetMaxCapacity => HintReply::Value(self.video_cache.limits().1),
            CacheHint::GetSize => HintReply::Value(self.video_cache.len()),
            CacheHint::GetRequestedCapacity => {
                HintReply::Value(self.video_cache.requested_capacity())
            }
            CacheHint::GetCapacity => HintReply::Value(self.video_cache.capacity()),
            CacheHint::Window(span) => {
                self.window.store(span.max(2), Ordering::Relaxed);
                HintReply::Ack
            }
            CacheHint::GetWindow => HintReply::Value(self.window.load(Ordering::Relaxed)),
            CacheHint::ConfigureAudioCache(bytes) => {
                if self.info.has_audio() {
                    self.audio.lock().configure(bytes);
                    HintReply::Ack
                } else {
                    HintReply::Unhandled
                }
            }
            CacheHint::DisableAudioCache => {
                self.audio.lock().disable();
                HintReply::Ack
            }
            CacheHint::GetAudioPolicy => HintReply::Policy(self.audio.lock().policy),
            CacheHint::GetAudioSize => HintReply::Value(self.audio.lock().buf.len()),
        }
    }
}

impl Drop for CacheFilter {
    fn drop(&mut self) {
        self.env.unregister_cache(self.id);
    }
}

/// Coarse audio cache: one contiguous span of recently read samples.
struct AudioCache {
    info: Option<AudioInfo>,
    policy: CachePolicy,
    buf: Vec<u8>,
    /// First sample held in `buf`.
    span_start: i64,
    /// Samples held in `buf`.
    span_len: i64,
}

impl AudioCache {
    fn new(info: Option<AudioInfo>) -> Self {
        let policy = if info.is_some() {
            CachePolicy::Audio
        } else {
            CachePolicy::AudioNone
        };
        Self {
            info,
            policy,
            buf: Vec::new(),
            span_start: 0,
            span_len: 0,
        }
    }

    /// (Re)size the buffer. A request of 0 bytes keeps an existing buffer
    /// or allocates the default budget. The buffer only ever grows.
    fn configure(&mut self, bytes: usize) {
        if self.info.is_none() {
            return;
        }
        let bytes = if bytes == 0 {
            if self.policy == CachePolicy::Audio && !self.buf.is_empty() {
                return;
            }
            AUDIO_CACHE_DEFAULT_BYTES
        } else {
            bytes
        };
        if bytes > self.buf.len() {
            self.buf.resize(bytes, 0);
            self.span_len = 0;
        }
        self.policy = CachePolicy::Audio;
    }

    fn disable(&mut self) {
        self.buf = Vec::new();
        self.span_len = 0;
        self.policy = CachePolicy::AudioNone;
    }
}
