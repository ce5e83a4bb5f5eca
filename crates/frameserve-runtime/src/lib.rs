//! FrameServe Runtime - frame allocator, caches, and worker pool
//!
//! The runtime owns everything a filter graph shares: reference-counted
//! frame buffers recycled under a global memory ceiling, a per-node LRU
//! frame cache with single-flight production, cooperative memory
//! reclamation across a ranked set of caches, and a worker pool with
//! batched completion handles.

mod allocator;
mod registry;

pub mod cache;
pub mod completion;
pub mod filter;
pub mod lru_cache;
pub mod mt_guard;
pub mod runtime;
pub mod thread_pool;

pub use cache::CacheFilter;
pub use completion::{Completion, CompletionSlot};
pub use filter::{CacheHint, CachePolicy, HintReply, VideoFilter};
pub use lru_cache::{Lookup, LruCache, Reservation};
pub use mt_guard::{MtGuard, MtMode};
pub use runtime::{Runtime, RuntimeConfig};
pub use thread_pool::ThreadPool;
