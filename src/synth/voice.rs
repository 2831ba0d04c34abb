use std::sync::Arc;

use crate::dsp::envelope::{Envelope, ENV_MAX};
use crate::dsp::filter::{CutoffInputs, VoiceFilter};
use crate::dsp::lfo::{scale_depth, Lfo, LFO_ONE};
use crate::dsp::pitch::{increment, offset_frequency, Portamento};
use crate::instrument::{Sample, Wave};
use crate::tables::{Tables, CENT_UNITS};

/*
Voice Lifecycle
===============

    Free ──note on──→ On ──note off──→ Off ──envelope done──→ Free
                       │                 ↑
                       ├─ pedal held ──→ Sustained ──pedal up──┘
                       │
                       └─ kill ───────→ Die ──fast release done──→ Free

  On          key held, envelope before release
  Sustained   key released while sustain (or sostenuto) holds the note
  Off         releasing normally
  Die         cut short: fast fade, used for same-note retrigger,
              all-sound-off and choke groups

A voice is also freed when a non-looping wave runs off the end of its data,
or when the pool evicts it.

Gains and pitch are recomputed once per control tick. The recompute pieces
that depend on channel state (base amplitude, static pitch, filter inputs)
are written by the synth; the pieces that move by themselves (envelopes,
LFOs, portamento) are advanced here.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Free,
    On,
    Sustained,
    Off,
    Die,
}

impl VoiceStatus {
    pub fn is_live(self) -> bool {
        self != VoiceStatus::Free
    }

    /// The key (or a pedal) still holds the note.
    pub fn is_held(self) -> bool {
        matches!(self, VoiceStatus::On | VoiceStatus::Sustained)
    }
}

/// Weak handle to a pool slot. Stale once the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceLink {
    pub index: usize,
    pub generation: u32,
}

#[derive(Debug, Clone)]
pub struct Voice {
    pub status: VoiceStatus,
    pub generation: u32,
    pub channel: usize,
    pub note: u8,
    pub velocity: u8,
    pub layer: u8,
    /// Sample clock when the voice started.
    pub started_at: u64,

    pub sample: Option<Arc<Sample>>,
    pub wave: Option<Wave>,
    /// Fixed-point read position.
    pub position: i64,
    /// Signed increment; the sign is the playback direction.
    pub increment: i32,
    /// Still looping. Cleared when a sustain-loop sample is released.
    pub looping: bool,
    /// Latched by the sostenuto pedal.
    pub sostenuto: bool,

    pub amp_env: Envelope,
    pub mod_env: Envelope,
    pub has_envelope: bool,
    pub filter: VoiceFilter,
    pub cutoff: CutoffInputs,
    pub vibrato: Lfo,
    pub tremolo: Lfo,
    pub portamento: Portamento,

    /// Frequency before vibrato, portamento and mod envelope, in milli-Hz.
    pub base_freq: u32,
    /// Vibrato depth in 1/16 cent at full LFO swing.
    pub vibrato_depth: i32,
    /// Tremolo depth, Q15.
    pub tremolo_depth: i32,
    pub tremolo_to_pitch: i32,
    pub tremolo_to_fc: i32,
    pub mod_env_to_pitch: i32,
    pub mod_env_to_fc: i32,
    pub freq: u32,

    /// Channel, velocity and master gain, without envelope.
    pub base_amp: f32,
    /// 0.5 for each half of a chorus pair.
    pub amp_scale: f32,
    pub pan: u8,
    pub left_gain: f32,
    pub right_gain: f32,
    pub sends: [f32; 3],

    pub chorus_link: Option<VoiceLink>,
    /// Chorus detune in 1/16 cent.
    pub detune: i32,
    /// Samples left until the next control tick.
    pub control_counter: u32,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            status: VoiceStatus::Free,
            generation: 0,
            channel: 0,
            note: 0,
            velocity: 0,
            layer: 0,
            started_at: 0,
            sample: None,
            wave: None,
            position: 0,
            increment: 0,
            looping: false,
            sostenuto: false,
            amp_env: Envelope::idle(),
            mod_env: Envelope::idle(),
            has_envelope: true,
            filter: VoiceFilter::default(),
            cutoff: CutoffInputs::default(),
            vibrato: Lfo::default(),
            tremolo: Lfo::default(),
            portamento: Portamento::default(),
            base_freq: 0,
            vibrato_depth: 0,
            tremolo_depth: 0,
            tremolo_to_pitch: 0,
            tremolo_to_fc: 0,
            mod_env_to_pitch: 0,
            mod_env_to_fc: 0,
            freq: 0,
            base_amp: 0.0,
            amp_scale: 1.0,
            pan: 64,
            left_gain: 0.0,
            right_gain: 0.0,
            sends: [0.0; 3],
            chorus_link: None,
            detune: 0,
            control_counter: 0,
        }
    }
}

impl Voice {
    pub fn link(&self, index: usize) -> VoiceLink {
        VoiceLink {
            index,
            generation: self.generation,
        }
    }

    pub fn is_free(&self) -> bool {
        self.status == VoiceStatus::Free
    }

    /// Loudness used to rank eviction candidates: the louder stereo side.
    pub fn mix_amplitude(&self) -> f32 {
        self.left_gain.max(self.right_gain)
    }

    pub fn is_fixed_pitch(&self) -> bool {
        self.sample.as_ref().is_some_and(|s| s.is_fixed_pitch())
    }

    /// Drop the per-note payload; the slot keeps its generation.
    pub fn clear(&mut self) {
        let generation = self.generation;
        *self = Voice {
            generation,
            ..Voice::default()
        };
    }

    /// Envelope (or its stand-in) as a 0..=1 gain.
    fn envelope_gain(&self) -> f32 {
        self.amp_env.level() as f32 / ENV_MAX as f32
    }

    /// Recompute stereo gains from the current envelope and tremolo.
    pub fn apply_gains(&mut self, tables: &Tables) {
        let mut gain = self.base_amp * self.amp_scale * self.envelope_gain();
        if self.tremolo_depth != 0 {
            let dip = scale_depth(self.tremolo.unipolar(tables), self.tremolo_depth);
            gain *= 1.0 - dip as f32 / LFO_ONE as f32;
        }
        let (left, right) = tables.pan_gains(self.pan);
        self.left_gain = gain * left;
        self.right_gain = gain * right;
    }

    /// Recompute the playback increment from the static frequency and the
    /// moving pitch sources.
    pub fn apply_pitch(&mut self, tables: &Tables, output_rate: u32) {
        let Some(wave) = self.wave.as_ref() else {
            return;
        };
        let mut offset = self.portamento.offset();
        if self.vibrato_depth != 0 {
            offset += scale_depth(self.vibrato.value(tables), self.vibrato_depth);
        }
        if self.tremolo_to_pitch != 0 {
            offset += scale_depth(self.tremolo.value(tables), self.tremolo_to_pitch * CENT_UNITS);
        }
        if self.mod_env_to_pitch != 0 {
            let level = self.mod_env.level() as i64;
            offset += (level * (self.mod_env_to_pitch * CENT_UNITS) as i64 / ENV_MAX as i64) as i32;
        }
        self.freq = if offset == 0 {
            self.base_freq
        } else {
            offset_frequency(tables, self.base_freq, offset)
        };
        let magnitude = increment(self.freq, wave.root_freq, wave.sample_rate, output_rate);
        self.increment = if self.increment < 0 { -magnitude } else { magnitude };
        debug_assert!(self.increment != 0, "advancing voice with zero increment");
    }

    /// Update the dynamic cutoff inputs and the filter coefficients.
    pub fn apply_filter(&mut self, tables: &Tables, output_rate: u32) {
        if self.filter.kind() == crate::dsp::filter::FilterKind::Off {
            return;
        }
        self.cutoff.mod_env_cents =
            (self.mod_env.level() as i64 * self.mod_env_to_fc as i64 / ENV_MAX as i64) as i32;
        self.cutoff.tremolo_cents = scale_depth(self.tremolo.value(tables), self.tremolo_to_fc);
        let params = self.cutoff.params(self.filter.kind(), tables, output_rate);
        self.filter.set_params(params, output_rate);
    }

    /// One control tick. Returns false once the amplitude envelope is done.
    pub fn control_tick(&mut self, tables: &Tables, output_rate: u32) -> bool {
        if !self.amp_env.advance() {
            self.left_gain = 0.0;
            self.right_gain = 0.0;
            return false;
        }
        self.mod_env.advance();
        self.vibrato.advance();
        self.tremolo.advance();
        self.portamento.advance();

        if self.vibrato_depth != 0
            || self.tremolo_to_pitch != 0
            || self.mod_env_to_pitch != 0
            || self.portamento.is_active()
        {
            self.apply_pitch(tables, output_rate);
        }
        if self.mod_env_to_fc != 0 || self.tremolo_to_fc != 0 {
            self.apply_filter(tables, output_rate);
        }
        self.apply_gains(tables);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::envelope::{EnvelopeRates, EnvelopeStage};

    fn sounding_voice(tables: &Tables) -> Voice {
        let mut voice = Voice {
            status: VoiceStatus::On,
            base_amp: 0.5,
            wave: Some(Wave {
                data: vec![0i16; 64].into(),
                sample_rate: 44_100,
                root_freq: 440_000,
                loop_start: 0,
                loop_end: 64,
            }),
            base_freq: 440_000,
            increment: 1,
            ..Voice::default()
        };
        voice.amp_env = Envelope::new(EnvelopeRates {
            rates: [ENV_MAX, ENV_MAX, ENV_MAX, ENV_MAX / 4, ENV_MAX / 4, ENV_MAX / 4],
            targets: [ENV_MAX, ENV_MAX, ENV_MAX, 0, 0, 0],
            sustain: true,
        });
        voice.amp_env.start();
        voice.apply_pitch(tables, 44_100);
        voice
    }

    #[test]
    fn gains_follow_envelope_and_pan() {
        let tables = Tables::new();
        let mut voice = sounding_voice(&tables);
        voice.apply_gains(&tables);
        assert_eq!(voice.mix_amplitude(), 0.0, "attack starts from silence");

        assert!(voice.control_tick(&tables, 44_100));
        assert_eq!(voice.amp_env.stage(), EnvelopeStage::Sustain);
        let (l, r) = tables.pan_gains(64);
        assert!((voice.left_gain - 0.5 * l).abs() < 1e-6);
        assert!((voice.right_gain - 0.5 * r).abs() < 1e-6);

        voice.pan = 0;
        voice.apply_gains(&tables);
        assert!(voice.right_gain.abs() < 1e-6);
        assert!((voice.mix_amplitude() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn release_ends_in_free_signal() {
        let tables = Tables::new();
        let mut voice = sounding_voice(&tables);
        voice.control_tick(&tables, 44_100);
        voice.amp_env.release();
        let mut ticks = 0;
        while voice.control_tick(&tables, 44_100) {
            ticks += 1;
            assert!(ticks < 10);
        }
        assert_eq!(voice.mix_amplitude(), 0.0);
    }

    #[test]
    fn pitch_keeps_direction() {
        let tables = Tables::new();
        let mut voice = sounding_voice(&tables);
        assert_eq!(voice.increment, 1 << crate::FRACTION_BITS);
        voice.increment = -voice.increment;
        voice.base_freq = 880_000;
        voice.apply_pitch(&tables, 44_100);
        assert_eq!(voice.increment, -(2 << crate::FRACTION_BITS));
    }

    #[test]
    fn clear_keeps_generation() {
        let mut voice = Voice {
            generation: 7,
            note: 60,
            status: VoiceStatus::On,
            ..Voice::default()
        };
        voice.clear();
        assert_eq!(voice.generation, 7);
        assert!(voice.is_free());
        assert_eq!(voice.link(3), VoiceLink { index: 3, generation: 7 });
    }
}
