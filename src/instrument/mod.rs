//! Instrument and sample descriptions consumed by the synth.
//!
//! Instruments are immutable once loaded and shared between voices through
//! `Arc`. Where they come from (patch files, a sound font, or the built-in
//! [`ToneBank`]) is the business of an [`InstrumentProvider`].

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::dsp::envelope::{offset_to_level, rate_from_time, scale_rate, EnvelopeRates, ENV_MAX};
use crate::dsp::filter::FilterKind;
use crate::tables::{Tables, CENT_UNITS};

pub mod tone_bank;

pub use tone_bank::ToneBank;

/// Raw PCM plus everything needed to play it back at a given pitch.
///
/// Cloning is cheap: the sample data is shared.
#[derive(Debug, Clone)]
pub struct Wave {
    pub data: Arc<[i16]>,
    /// Rate the data was recorded at, in Hz.
    pub sample_rate: u32,
    /// Frequency the data sounds at when played at `sample_rate`, in milli-Hz.
    pub root_freq: u32,
    /// Loop points in frames.
    pub loop_start: u32,
    pub loop_end: u32,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Data end as a fixed-point position.
    pub fn end_position(&self) -> i64 {
        (self.data.len() as i64) << crate::FRACTION_BITS
    }

    pub fn loop_positions(&self) -> (i64, i64) {
        (
            (self.loop_start as i64) << crate::FRACTION_BITS,
            (self.loop_end.min(self.data.len() as u32) as i64) << crate::FRACTION_BITS,
        )
    }

    pub fn has_loop(&self) -> bool {
        self.loop_end > self.loop_start && (self.loop_end as usize) <= self.data.len()
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleModes {
    pub looping: bool,
    /// Bounce between the loop points instead of wrapping.
    pub pingpong: bool,
    /// Play the data backwards.
    pub reverse: bool,
    /// Loop only while the key (or pedal) is held.
    pub sustain: bool,
    /// Shape the amplitude with the sample's envelope.
    pub envelope: bool,
}

/// Six-stage envelope as authored: times in milliseconds and 8-bit target
/// offsets, with optional key and velocity scaling of the rates.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeSpec {
    pub times_ms: [u32; 6],
    pub offsets: [u8; 6],
    /// Rate change per key above middle C, in cents.
    pub key_follow: i16,
    /// Rate change per velocity step above 64, in cents.
    pub vel_follow: i16,
    pub sustain: bool,
}

impl Default for EnvelopeSpec {
    fn default() -> Self {
        Self::adsr(5, 200, 200, 300)
    }
}

/// Rate adjustments for one note start, as cents on top of the authored rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeBias {
    pub attack_cents: i32,
    pub decay_cents: i32,
    pub release_cents: i32,
}

impl EnvelopeSpec {
    /// Classic ADSR: `sustain` is an 8-bit level.
    pub const fn adsr(attack_ms: u32, decay_ms: u32, sustain: u8, release_ms: u32) -> Self {
        Self {
            times_ms: [attack_ms, 0, decay_ms, release_ms, release_ms, release_ms],
            offsets: [255, 255, sustain, 0, 0, 0],
            key_follow: 0,
            vel_follow: 0,
            sustain: true,
        }
    }

    /// Convert to per-tick rates for one note.
    pub fn rates(
        &self,
        tables: &Tables,
        note: u8,
        velocity: u8,
        bias: EnvelopeBias,
        sample_rate: u32,
        control_ratio: u32,
    ) -> EnvelopeRates {
        let key = (note as i32 - 60) * self.key_follow as i32;
        let vel = (velocity as i32 - 64) * self.vel_follow as i32;
        let mut rates = [0i32; 6];
        let mut targets = [0i32; 6];
        for stage in 0..6 {
            let level = offset_to_level(self.offsets[stage]);
            let time = self.times_ms[stage];
            let rate = if time == 0 {
                ENV_MAX
            } else {
                rate_from_time(time, sample_rate, control_ratio)
            };
            let cents = match stage {
                0 => key + vel + bias.attack_cents,
                1 | 2 => key + bias.decay_cents,
                _ => bias.release_cents,
            };
            rates[stage] = if cents == 0 {
                rate
            } else {
                scale_rate(rate, tables.pitch_ratio(cents.saturating_mul(CENT_UNITS)))
            };
            targets[stage] = level;
        }
        EnvelopeRates {
            rates,
            targets,
            sustain: self.sustain,
        }
    }
}

/// Vibrato or tremolo settings of a sample.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LfoSpec {
    pub rate_mhz: u32,
    /// Vibrato depth in cents, or tremolo depth in 1/255 of full scale.
    pub depth: i32,
    pub delay_ms: u32,
    pub sweep_ms: u32,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFilter {
    pub kind: FilterKind,
    pub cutoff_hz: u32,
    /// Centibels.
    pub resonance_cb: i32,
    pub vel_to_fc: i32,
    pub vel_to_fc_threshold: u8,
    pub vel_to_resonance_cb: i32,
    pub key_to_fc: i32,
    pub key_to_fc_break: u8,
}

#[derive(Debug, Clone)]
pub struct Sample {
    pub wave: Wave,
    pub low_key: u8,
    pub high_key: u8,
    pub low_vel: u8,
    pub high_vel: u8,
    /// Fixed pitch: always play as this note (percussion).
    pub note_to_use: Option<u8>,
    pub modes: SampleModes,
    pub volume: f32,
    pub panning: Option<u8>,
    pub amp_env: EnvelopeSpec,
    pub mod_env: EnvelopeSpec,
    pub mod_env_to_pitch: i32,
    pub mod_env_to_fc: i32,
    pub filter: SampleFilter,
    pub vibrato: LfoSpec,
    pub tremolo: LfoSpec,
    pub tremolo_to_pitch: i32,
    pub tremolo_to_fc: i32,
    /// Cents per key (100 for a normally tuned sample).
    pub scale_tuning: i32,
    pub scale_note: u8,
}

impl Sample {
    pub fn new(wave: Wave) -> Self {
        Self {
            wave,
            low_key: 0,
            high_key: 127,
            low_vel: 0,
            high_vel: 127,
            note_to_use: None,
            modes: SampleModes {
                looping: true,
                envelope: true,
                ..SampleModes::default()
            },
            volume: 1.0,
            panning: None,
            amp_env: EnvelopeSpec::default(),
            mod_env: EnvelopeSpec::default(),
            mod_env_to_pitch: 0,
            mod_env_to_fc: 0,
            filter: SampleFilter::default(),
            vibrato: LfoSpec::default(),
            tremolo: LfoSpec::default(),
            tremolo_to_pitch: 0,
            tremolo_to_fc: 0,
            scale_tuning: 100,
            scale_note: 60,
        }
    }

    pub fn matches(&self, note: u8, velocity: u8) -> bool {
        (self.low_key..=self.high_key).contains(&note) && (self.low_vel..=self.high_vel).contains(&velocity)
    }

    pub fn is_fixed_pitch(&self) -> bool {
        self.note_to_use.is_some()
    }

    /// Loops for as long as the note is held.
    pub fn loops(&self) -> bool {
        self.modes.looping && self.wave.has_loop()
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub name: String,
    pub samples: Vec<Arc<Sample>>,
}

impl Instrument {
    pub fn new(name: impl Into<String>, samples: Vec<Sample>) -> Self {
        Self {
            name: name.into(),
            samples: samples.into_iter().map(Arc::new).collect(),
        }
    }

    /// Samples sounding for `(note, velocity)`, with their layer index.
    pub fn layers(&self, note: u8, velocity: u8) -> impl Iterator<Item = (u8, &Arc<Sample>)> {
        self.samples
            .iter()
            .enumerate()
            .filter(move |(_, s)| s.matches(note, velocity))
            .map(|(i, s)| (i.min(u8::MAX as usize) as u8, s))
    }
}

/// Source of instruments.
///
/// Implementations must be idempotent: loading the same `(is_drum, bank,
/// program)` twice returns the same data, and an expensive build happens at
/// most once per key.
pub trait InstrumentProvider {
    /// `None` means the program is missing; the channel plays silence.
    fn load(&mut self, is_drum: bool, bank: u16, program: u8) -> Option<Arc<Instrument>>;

    /// A copy of `sample` pre-resampled so that `note` plays at unit increment.
    fn resampled(&mut self, _sample: &Arc<Sample>, _note: u8, _output_rate: u32) -> Option<Wave> {
        None
    }
}

impl<P: InstrumentProvider + ?Sized> InstrumentProvider for Box<P> {
    fn load(&mut self, is_drum: bool, bank: u16, program: u8) -> Option<Arc<Instrument>> {
        (**self).load(is_drum, bank, program)
    }

    fn resampled(&mut self, sample: &Arc<Sample>, note: u8, output_rate: u32) -> Option<Wave> {
        (**self).resampled(sample, note, output_rate)
    }
}

/// Provider with nothing in it. Every channel is silent.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyBank;

impl InstrumentProvider for EmptyBank {
    fn load(&mut self, _is_drum: bool, _bank: u16, _program: u8) -> Option<Arc<Instrument>> {
        None
    }
}
