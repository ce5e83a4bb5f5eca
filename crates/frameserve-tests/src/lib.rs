//! Integration test crate for FrameServe.
//!
//! This crate exists solely to hold cross-crate integration tests.
//! It depends on multiple frameserve crates to verify they work together.

#[cfg(test)]
mod support;

#[cfg(test)]
mod cache_behavior;

#[cfg(test)]
mod memory;

#[cfg(test)]
mod threading;

#[cfg(test)]
mod pipeline;
