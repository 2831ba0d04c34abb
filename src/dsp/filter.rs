use std::f32::consts::TAU;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::tables::{Tables, CENT_UNITS};

/*
Voice Filter
============

Every voice owns one resonant low-pass filter. Two topologies are available:

| kind          | structure                          | character             |
| ------------- | ---------------------------------- | --------------------- |
| StateVariable | two trapezoidal integrators (TPT)  | clean, 12 dB/oct      |
| Ladder        | four one-pole stages + feedback    | warm, 24 dB/oct       |

Cutoff Computation
------------------

The cutoff a voice hears is the instrument's base cutoff moved by a sum of
offsets, all expressed in cents (1/16 cent units internally):

    cents = channel NRPN cutoff
          + drum-note cutoff override
          + vel_to_fc * (velocity - threshold) / 127    (reverses below threshold)
          + key_to_fc * (note - break_key)
          + mod_env_to_fc * mod envelope level
          + tremolo_to_fc * tremolo LFO value

    cutoff = base * 2^(cents / 1200)

Clamps
------

  cutoff      [5 Hz, min(20 kHz, Nyquist)]
  resonance   [0 dB, 96 dB]

After the generic clamp each topology applies its own limit: the
state-variable filter caps its resonance once the cutoff passes one sixth of
the sample rate, where it would otherwise ring.
*/

pub const MIN_CUTOFF_HZ: f32 = 5.0;
pub const MAX_CUTOFF_HZ: f32 = 20_000.0;
pub const MAX_RESONANCE_DB: f32 = 96.0;
/// Resonance ceiling for the state-variable filter above rate / 6.
pub const SVF_HIGH_CUTOFF_RESONANCE_DB: f32 = 6.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterKind {
    #[default]
    Off,
    StateVariable,
    Ladder,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub cutoff_hz: f32,
    pub resonance_db: f32,
}

impl FilterParams {
    /// Generic clamp shared by both topologies.
    pub fn clamped(cutoff_hz: f32, resonance_db: f32, sample_rate: u32) -> Self {
        let ceiling = MAX_CUTOFF_HZ.min(sample_rate as f32 / 2.0);
        let cutoff_hz = if cutoff_hz.is_nan() {
            ceiling
        } else {
            cutoff_hz.clamp(MIN_CUTOFF_HZ, ceiling)
        };
        let resonance_db = if resonance_db.is_nan() {
            0.0
        } else {
            resonance_db.clamp(0.0, MAX_RESONANCE_DB)
        };
        Self {
            cutoff_hz,
            resonance_db,
        }
    }

    /// Topology-specific limits, applied after [`clamped`](Self::clamped).
    pub fn for_kind(mut self, kind: FilterKind, sample_rate: u32) -> Self {
        if kind == FilterKind::StateVariable && self.cutoff_hz > sample_rate as f32 / 6.0 {
            self.resonance_db = self.resonance_db.min(SVF_HIGH_CUTOFF_RESONANCE_DB);
        }
        self
    }
}

/// Everything that biases a voice's cutoff and resonance.
#[derive(Debug, Clone, Copy, Default)]
pub struct CutoffInputs {
    pub base_cutoff_hz: u32,
    /// Base resonance in centibels.
    pub base_resonance_cb: i32,
    pub channel_cents: i32,
    pub channel_resonance_cb: i32,
    pub drum_cents: i32,
    pub drum_resonance_cb: i32,
    pub velocity: u8,
    pub vel_to_fc: i32,
    pub vel_to_fc_threshold: u8,
    pub vel_to_resonance_cb: i32,
    pub note: u8,
    pub key_to_fc: i32,
    pub key_to_fc_break: u8,
    /// Modulation envelope contribution, already scaled, in cents.
    pub mod_env_cents: i32,
    /// Tremolo contribution, already scaled, in cents.
    pub tremolo_cents: i32,
}

impl CutoffInputs {
    /// Total cutoff offset in cents.
    pub fn cents(&self) -> i32 {
        let velocity = self.vel_to_fc * (self.velocity as i32 - self.vel_to_fc_threshold as i32) / 127;
        let key = self.key_to_fc * (self.note as i32 - self.key_to_fc_break as i32);
        self.channel_cents + self.drum_cents + velocity + key + self.mod_env_cents + self.tremolo_cents
    }

    pub fn resonance_cb(&self) -> i32 {
        let velocity = self.vel_to_resonance_cb * self.velocity as i32 / 127;
        self.base_resonance_cb + self.channel_resonance_cb + self.drum_resonance_cb + velocity
    }

    pub fn params(&self, kind: FilterKind, tables: &Tables, sample_rate: u32) -> FilterParams {
        let offset = self.cents().saturating_mul(CENT_UNITS);
        let cutoff = self.base_cutoff_hz as f32 * tables.pitch_ratio_f32(offset);
        let resonance = self.resonance_cb() as f32 / 10.0;
        FilterParams::clamped(cutoff, resonance, sample_rate).for_kind(kind, sample_rate)
    }
}

pub struct FilterOutputs {
    pub lowpass: f32,
    pub bandpass: f32,
    pub highpass: f32,
}

/// Topology-preserving state-variable filter.
#[derive(Debug, Clone, Default)]
pub struct SVFilter {
    ic1eq: f32, // First integrator's memory
    ic2eq: f32, // Second integrator's memory
    g: f32,
    k: f32,
}

impl SVFilter {
    pub fn set_params(&mut self, params: FilterParams, sample_rate: f32) {
        let wd = TAU * params.cutoff_hz;
        let wa = (2.0 * sample_rate) * (wd / (2.0 * sample_rate)).tan();
        self.g = wa / (2.0 * sample_rate);
        // 0 dB is a Butterworth response (Q = 1/sqrt 2).
        let q = std::f32::consts::FRAC_1_SQRT_2 * 10f32.powf(params.resonance_db / 20.0);
        self.k = 1.0 / q;
    }

    #[inline]
    pub fn next_sample(&mut self, sample: f32) -> FilterOutputs {
        let (g, k) = (self.g, self.k);
        let h = 1.0 / (1.0 + g * (g + k));
        let v3 = sample - self.ic2eq;
        let v1 = h * (self.ic1eq + g * v3);
        let v2 = self.ic2eq + g * v1;

        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;

        FilterOutputs {
            lowpass: v2,
            bandpass: v1,
            highpass: sample - k * v1 - v2,
        }
    }

    pub fn reset(&mut self) {
        self.ic1eq = 0.0;
        self.ic2eq = 0.0;
    }
}

/// Four-pole transistor-ladder approximation.
#[derive(Debug, Clone, Default)]
pub struct LadderFilter {
    stage: [f32; 4],
    delay: [f32; 4],
    p: f32,
    k: f32,
    r: f32,
}

impl LadderFilter {
    pub fn set_params(&mut self, params: FilterParams, sample_rate: f32) {
        let f = (2.0 * params.cutoff_hz / sample_rate).min(0.99);
        self.k = 3.6 * f - 1.6 * f * f - 1.0;
        self.p = (self.k + 1.0) * 0.5;
        let scale = ((1.0 - self.p) * 1.386_249).exp();
        // 0 dB → no feedback, very high resonance approaches self-oscillation.
        let feedback = 1.0 - 10f32.powf(-params.resonance_db / 20.0);
        self.r = feedback * 0.98 * scale;
    }

    #[inline]
    pub fn next_sample(&mut self, sample: f32) -> f32 {
        let x = sample - self.r * self.stage[3];
        let mut input = x;
        for i in 0..4 {
            let out = input * self.p + self.delay[i] * self.p - self.k * self.stage[i];
            self.delay[i] = input;
            self.stage[i] = out;
            input = out;
        }
        // Soft-clip the last stage to keep heavy feedback bounded.
        self.stage[3] -= self.stage[3] * self.stage[3] * self.stage[3] / 6.0;
        self.stage[3]
    }

    pub fn reset(&mut self) {
        self.stage = [0.0; 4];
        self.delay = [0.0; 4];
    }
}

/// The filter carried by a voice, with a cache of the last parameters.
#[derive(Debug, Clone, Default)]
pub struct VoiceFilter {
    kind: FilterKind,
    params: Option<FilterParams>,
    svf: SVFilter,
    ladder: LadderFilter,
}

impl VoiceFilter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    pub fn params(&self) -> Option<FilterParams> {
        self.params
    }

    /// Recompute coefficients if the parameters moved.
    pub fn set_params(&mut self, params: FilterParams, sample_rate: u32) {
        if self.params == Some(params) {
            return;
        }
        self.params = Some(params);
        match self.kind {
            FilterKind::Off => {}
            FilterKind::StateVariable => self.svf.set_params(params, sample_rate as f32),
            FilterKind::Ladder => self.ladder.set_params(params, sample_rate as f32),
        }
    }

    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        match self.kind {
            FilterKind::Off => sample,
            FilterKind::StateVariable => self.svf.next_sample(sample).lowpass,
            FilterKind::Ladder => self.ladder.next_sample(sample),
        }
    }

    pub fn reset(&mut self) {
        self.params = None;
        self.svf.reset();
        self.ladder.reset();
    }
}
