//! FrameServe Filters - built-in sources and transforms
//!
//! A small set of graph nodes used to exercise the runtime: deterministic
//! sources for tests and demos, and a crop transform built on subframe
//! views.

pub mod counter;
pub mod crop;
pub mod sources;

pub use counter::FrameCounterSource;
pub use crop::Crop;
pub use sources::{ColorBarsSource, SolidColorSource};
