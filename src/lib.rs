//! Sample-based MIDI synthesis engine.
//!
//! A [`Synth`] owns the channel state, a fixed-capacity voice pool and the
//! lookup tables; a [`Scheduler`] walks a timestamped event stream, renders
//! the audio between events and hands full buffers to an output sink.

pub mod config;
pub mod dsp; // Envelope, filter, LFO and pitch math
pub mod engine; // Voice pool, time base, mixer and scheduler
pub mod error;
pub mod instrument;
pub mod io; // Event stream and output sink contracts
pub mod synth; // Channel state, voices and event application
pub mod tables;

pub use config::SynthConfig;
pub use engine::scheduler::{PlaybackOutcome, Scheduler, SchedulerState};
pub use error::{ConfigError, SinkError, SynthError};
pub use synth::Synth;

/// Largest buffer, in frames, the scheduler will accumulate before flushing.
pub const MAX_BLOCK_SIZE: usize = 8192;

/// Fractional bits of a voice's sample position and increment.
pub const FRACTION_BITS: u32 = 12;
pub(crate) const FRACTION_MASK: i64 = (1 << FRACTION_BITS) - 1;
