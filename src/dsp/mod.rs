//! Low-level DSP primitives carried inside every voice.
//!
//! These components are allocation-free and realtime-safe, making them safe to
//! embed directly inside voice structs. Envelope, LFO and pitch math is fixed
//! point; only the filter runs in f32.

/// Six-stage fixed-point envelope (amplitude and modulation).
pub mod envelope;
/// State-variable and ladder filters with cutoff/resonance computation.
pub mod filter;
/// Control-rate LFO for vibrato and tremolo.
pub mod lfo;
/// Frequency offsets, sample increments and portamento.
pub mod pitch;

pub use envelope::{Envelope, EnvelopeStage};
pub use filter::{FilterKind, VoiceFilter};
pub use lfo::Lfo;
