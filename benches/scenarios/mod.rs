//! Real-world scenario benchmarks.
//!
//! Whole-engine renders: many voices through the mixer, and an event stream
//! played through the scheduler into memory.

mod playback;
mod voices;

pub use playback::bench_playback;
pub use voices::bench_voices;
