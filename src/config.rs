//! Engine configuration.
//!
//! Everything here is fixed for the lifetime of a [`Synth`](crate::Synth):
//! the sample rate, the pool capacity and the control ratio all feed
//! precomputed rates and tables.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const MIN_SAMPLE_RATE: u32 = 4_000;
pub const MAX_SAMPLE_RATE: u32 = 192_000;
pub const MAX_CONTROL_RATIO: u32 = 255;
pub const DEFAULT_VOICES: usize = 64;
pub const DEFAULT_BUFFER_FRAMES: usize = 1024;
/// Two 16-channel ports.
pub const DEFAULT_CHANNELS: usize = 32;
pub const MAX_CHANNELS: usize = 64;
/// Percussion lives on MIDI channel 10 of every port.
pub const DEFAULT_DRUM_CHANNEL: usize = 9;

/// Control ratio that keeps the control rate near 1 kHz.
pub fn control_ratio_for(sample_rate: u32) -> u32 {
    (sample_rate / 1000).clamp(1, MAX_CONTROL_RATIO)
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Fixed capacity of the voice pool.
    pub max_voices: usize,
    /// Samples rendered per control tick (envelopes, LFOs, portamento).
    pub control_ratio: u32,
    /// Frames accumulated before the buffer is handed to the sink.
    pub buffer_frames: usize,
    /// Number of MIDI channels (16 per port).
    pub channels: usize,
    /// Bit set of channels that start out as drum channels.
    pub drum_channels: u64,
    /// Render a second, detuned voice for notes on channels with chorus send.
    pub chorus_doubling: bool,
    /// Detune of each half of a doubled note, in cents.
    pub chorus_detune_cents: i32,
    /// Scan ahead for pitch bends that push un-looped samples past their end.
    pub early_note_end: bool,
    /// Output gain in percent.
    pub amplification: u16,
    /// Release time used when a voice is killed outright, in milliseconds.
    pub kill_time_ms: u32,
    /// Longest release tail rendered after the event stream ends, in milliseconds.
    pub max_tail_ms: u32,
    /// Ask the instrument provider for waves resampled to the note's pitch.
    pub pre_resample: bool,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_RATE)
    }
}

impl SynthConfig {
    pub fn new(sample_rate: u32) -> Self {
        let mut drum_channels = 0u64;
        let mut ch = DEFAULT_DRUM_CHANNEL;
        while ch < DEFAULT_CHANNELS {
            drum_channels |= 1 << ch;
            ch += 16;
        }

        Self {
            sample_rate,
            max_voices: DEFAULT_VOICES,
            control_ratio: control_ratio_for(sample_rate),
            buffer_frames: DEFAULT_BUFFER_FRAMES,
            channels: DEFAULT_CHANNELS,
            drum_channels,
            chorus_doubling: false,
            chorus_detune_cents: 6,
            early_note_end: true,
            amplification: 70,
            kill_time_ms: 5,
            max_tail_ms: 10_000,
            pre_resample: false,
        }
    }

    pub fn with_max_voices(mut self, voices: usize) -> Self {
        self.max_voices = voices;
        self
    }

    pub fn with_control_ratio(mut self, ratio: u32) -> Self {
        self.control_ratio = ratio;
        self
    }

    pub fn with_buffer_frames(mut self, frames: usize) -> Self {
        self.buffer_frames = frames;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels;
        self
    }

    /// Mark or unmark `channel` as a drum channel at reset.
    pub fn with_drum_channel(mut self, channel: usize, drum: bool) -> Self {
        if channel < MAX_CHANNELS {
            if drum {
                self.drum_channels |= 1 << channel;
            } else {
                self.drum_channels &= !(1 << channel);
            }
        }
        self
    }

    pub fn with_chorus_doubling(mut self, detune_cents: i32) -> Self {
        self.chorus_doubling = true;
        self.chorus_detune_cents = detune_cents;
        self
    }

    pub fn with_early_note_end(mut self, enabled: bool) -> Self {
        self.early_note_end = enabled;
        self
    }

    pub fn with_amplification(mut self, percent: u16) -> Self {
        self.amplification = percent.min(800);
        self
    }

    pub fn with_pre_resample(mut self, enabled: bool) -> Self {
        self.pre_resample = enabled;
        self
    }

    pub fn is_drum_channel(&self, channel: usize) -> bool {
        channel < MAX_CHANNELS && self.drum_channels & (1 << channel) != 0
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if !(1..=MAX_CONTROL_RATIO).contains(&self.control_ratio) {
            return Err(ConfigError::ControlRatio(self.control_ratio));
        }
        if self.max_voices == 0 {
            return Err(ConfigError::NoVoices);
        }
        if self.buffer_frames == 0 || self.buffer_frames > crate::MAX_BLOCK_SIZE {
            return Err(ConfigError::BufferFrames(self.buffer_frames));
        }
        if self.channels == 0 || self.channels > MAX_CHANNELS {
            return Err(ConfigError::Channels(self.channels));
        }
        Ok(())
    }
}
