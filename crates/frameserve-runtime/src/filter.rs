//! The graph-node seam: every producer or transform in a filter graph
//! implements [`VideoFilter`], and the runtime talks to nodes through it.
//!
//! The control plane is a closed command type ([`CacheHint`]) with an
//! explicit reply type ([`HintReply`]) so the primary data-plane contract
//! stays narrow.

use crate::runtime::Runtime;
use frameserve_core::{FrameHandle, Result, VideoInfo};

/// Caching policy reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Generic LRU video caching.
    Generic,
    /// Audio caching active.
    Audio,
    /// Audio caching disabled.
    AudioNone,
}

/// Control-plane commands understood by cache nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHint {
    /// Is this node a cache?
    IsCacheQuery,
    /// Current video caching policy.
    GetPolicy,
    /// Asks the node whether it refuses to be wrapped in a cache.
    DontCacheMe,
    SetMinCapacity(usize),
    SetMaxCapacity(usize),
    GetMinCapacity,
    GetMaxCapacity,
    GetSize,
    GetRequestedCapacity,
    GetCapacity,
    /// Informational frame-window hint; windows below 2 are raised to 2.
    Window(usize),
    GetWindow,
    /// (Re)size the audio cache, in bytes; 0 requests the default budget.
    ConfigureAudioCache(usize),
    /// Free the audio cache buffer.
    DisableAudioCache,
    GetAudioPolicy,
    GetAudioSize,
}

/// Replies to [`CacheHint`] commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintReply {
    /// The node does not handle this command.
    Unhandled,
    /// Command accepted.
    Ack,
    /// Sentinel confirming the node is a cache.
    IsCache,
    /// Integer query result.
    Value(usize),
    /// Policy query result.
    Policy(CachePolicy),
}

impl HintReply {
    /// Integer payload of a [`HintReply::Value`], if any.
    pub fn value(self) -> Option<usize> {
        match self {
            HintReply::Value(n) => Some(n),
            _ => None,
        }
    }
}

/// A node in the filter graph.
///
/// Any thread may call `get_frame`; implementations that are not safe under
/// concurrent invocation should be wrapped in an
/// [`MtGuard`](crate::mt_guard::MtGuard).
pub trait VideoFilter: Send + Sync {
    /// Stream description of this node's output.
    fn video_info(&self) -> &VideoInfo;

    /// Produce frame `n`.
    fn get_frame(&self, n: usize, env: &Runtime) -> Result<FrameHandle>;

    /// Fill `buf` with `count` interleaved samples starting at `start`.
    /// Nodes without audio fill silence.
    fn get_audio(&self, buf: &mut [u8], _start: i64, _count: i64, _env: &Runtime) -> Result<()> {
        buf.fill(0);
        Ok(())
    }

    /// Field parity of frame `n`.
    fn get_parity(&self, _n: usize) -> bool {
        false
    }

    /// Control-plane entry point.
    fn set_cache_hints(&self, _hint: CacheHint) -> HintReply {
        HintReply::Unhandled
    }
}
